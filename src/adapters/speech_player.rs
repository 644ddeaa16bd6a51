use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::DomainError;
use crate::ports::{SpeechBackend, SpeechHandle, SpeechOutcome, SpeechOutput};

/// Speech output that drives one backend operation at a time.
///
/// Every operation runs on its own task which is the only writer of the
/// handle's outcome, so a handle resolves exactly once. An operation whose
/// token was cancelled resolves `Cancelled` even if the backend finished.
pub struct SpeechPlayer {
    backend: Arc<dyn SpeechBackend>,
    next_id: AtomicU64,
    active: Mutex<Option<SpeechHandle>>,
    /// Serializes `speak` so a new operation never overlaps the previous one.
    speak_lock: tokio::sync::Mutex<()>,
}

impl SpeechPlayer {
    pub fn new(backend: Arc<dyn SpeechBackend>) -> Self {
        info!(backend = backend.name(), "SpeechPlayer initialized");
        Self {
            backend,
            next_id: AtomicU64::new(1),
            active: Mutex::new(None),
            speak_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Id of the operation currently owning the speaker, if any.
    pub fn active_id(&self) -> Option<u64> {
        self.active
            .lock()
            .as_ref()
            .filter(|h| h.outcome().is_none())
            .map(SpeechHandle::id)
    }

    fn spawn_operation(&self, text: String) -> SpeechHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let handle = SpeechHandle::new(id, cancel.clone(), outcome_rx);

        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            let result = backend.render(&text, cancel.clone()).await;
            let outcome = match result {
                _ if cancel.is_cancelled() => SpeechOutcome::Cancelled,
                Ok(()) => SpeechOutcome::Completed,
                Err(DomainError::Cancelled) => SpeechOutcome::Cancelled,
                Err(e) => {
                    warn!(id, backend = backend.name(), error = %e, "Speech failed");
                    SpeechOutcome::Failed(e)
                }
            };
            debug!(id, outcome = ?outcome, "Speech operation resolved");
            outcome_tx.send_replace(Some(outcome));
        });

        handle
    }
}

#[async_trait]
impl SpeechOutput for SpeechPlayer {
    async fn speak(&self, text: &str) -> Result<SpeechHandle, DomainError> {
        if text.trim().is_empty() {
            return Err(DomainError::Synthesis("Nothing to speak".to_string()));
        }

        let _guard = self.speak_lock.lock().await;

        let prior = self.active.lock().take();
        if let Some(prior) = prior {
            if prior.outcome().is_none() {
                info!(id = prior.id(), "Cancelling in-flight speech before speaking again");
                prior.cancel_token().cancel();
                prior.finished().await;
            }
        }

        let handle = self.spawn_operation(text.to_string());
        info!(id = handle.id(), chars = text.len(), backend = self.backend.name(), "Speaking");
        *self.active.lock() = Some(handle.clone());
        Ok(handle)
    }

    /// Fires the operation's token. The handle stays active until the
    /// backend has actually stopped, so the next `speak` waits for it.
    fn cancel(&self, handle: &SpeechHandle) {
        handle.cancel_token().cancel();
        debug!(id = handle.id(), "Speech cancel requested");
    }
}

impl Drop for SpeechPlayer {
    fn drop(&mut self) {
        if let Some(handle) = self.active.get_mut().take() {
            handle.cancel_token().cancel();
        }
    }
}
