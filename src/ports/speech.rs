use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::domain::DomainError;

/// Terminal result of one speak request. Each handle resolves exactly once.
#[derive(Debug, Clone)]
pub enum SpeechOutcome {
    Completed,
    Cancelled,
    Failed(DomainError),
}

impl SpeechOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SpeechOutcome::Completed)
    }
}

/// Ownership token for an in-flight synthesis/playback operation.
///
/// Cloning shares the same underlying operation; the outcome is observed,
/// never produced, through a handle.
#[derive(Debug, Clone)]
pub struct SpeechHandle {
    id: u64,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<SpeechOutcome>>,
}

impl SpeechHandle {
    pub fn new(
        id: u64,
        cancel: CancellationToken,
        outcome: watch::Receiver<Option<SpeechOutcome>>,
    ) -> Self {
        Self { id, cancel, outcome }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The outcome if the operation already finished.
    pub fn outcome(&self) -> Option<SpeechOutcome> {
        self.outcome.borrow().clone()
    }

    /// Wait for the single resolution of this operation.
    pub async fn finished(&self) -> SpeechOutcome {
        let mut rx = self.outcome.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(SpeechOutcome::Cancelled),
            // The driver went away without resolving; nothing is playing anymore.
            Err(_) => SpeechOutcome::Cancelled,
        };
        outcome
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Port for speaking text aloud.
///
/// Only one operation may be active: `speak` cancels the in-flight one and
/// waits for it to release the speaker before starting.
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    /// Begin speaking `text`. Fails with `Synthesis` if the text is rejected
    /// up front; backend failures resolve the handle with `Failed`.
    async fn speak(&self, text: &str) -> Result<SpeechHandle, DomainError>;

    /// Stop the operation immediately. Safe to call after it finished.
    fn cancel(&self, handle: &SpeechHandle);
}

/// A synthesis backend driven by a speech output.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Synthesize and play `text`, returning when playback has finished.
    ///
    /// Must stop promptly and release its resources once `cancel` fires.
    async fn render(&self, text: &str, cancel: CancellationToken) -> Result<(), DomainError>;
}

/// Port for the speaker.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play mono samples in [-1, 1], returning when done or cancelled.
    async fn play(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        cancel: CancellationToken,
    ) -> Result<(), DomainError>;
}
