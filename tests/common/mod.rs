//! In-memory fakes for the session controller ports

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch, Notify};
use tokio_util::sync::CancellationToken;

use hope_voice::adapters::SpeechPlayer;
use hope_voice::domain::{
    AudioBuffer, AudioPayload, CaptureEvent, CaptureHandle, DomainError,
    InferenceResult, Phase, SessionEvent, SessionIdentity,
};
use hope_voice::ports::{AudioCapture, InferenceClient, SpeechBackend, SpeechOutput};
use hope_voice::{SessionController, SessionSettings};

/// Microphone fake that hands out 100 ms of audio per capture.
pub struct FakeCapture {
    next_id: AtomicU64,
    open: Mutex<Option<u64>>,
    fail_begin: Mutex<Option<DomainError>>,
    empty: Mutex<bool>,
    hang_begin: Mutex<bool>,
    begins: AtomicUsize,
    ends: AtomicUsize,
    events: broadcast::Sender<CaptureEvent>,
}

impl FakeCapture {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(8);
        Self {
            next_id: AtomicU64::new(1),
            open: Mutex::new(None),
            fail_begin: Mutex::new(None),
            empty: Mutex::new(false),
            hang_begin: Mutex::new(false),
            begins: AtomicUsize::new(0),
            ends: AtomicUsize::new(0),
            events,
        }
    }

    pub fn fail_next_begin(&self, error: DomainError) {
        *self.fail_begin.lock() = Some(error);
    }

    /// The next `begin` never completes.
    pub fn hang_next_begin(&self) {
        *self.hang_begin.lock() = true;
    }

    pub fn produce_nothing(&self) {
        *self.empty.lock() = true;
    }

    pub fn open_id(&self) -> Option<u64> {
        *self.open.lock()
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn ends(&self) -> usize {
        self.ends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioCapture for FakeCapture {
    async fn begin(&self) -> Result<CaptureHandle, DomainError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_begin.lock().take() {
            return Err(error);
        }
        let hang = std::mem::take(&mut *self.hang_begin.lock());
        if hang {
            std::future::pending::<()>().await;
        }
        let mut open = self.open.lock();
        if open.is_some() {
            return Err(DomainError::CaptureAlreadyOpen);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        *open = Some(id);
        Ok(CaptureHandle::new(id))
    }

    async fn end(&self, handle: CaptureHandle) -> Result<AudioPayload, DomainError> {
        {
            let mut open = self.open.lock();
            if *open != Some(handle.id()) {
                return Err(DomainError::CaptureNotOpen);
            }
            *open = None;
        }
        self.ends.fetch_add(1, Ordering::SeqCst);

        let mut buffer = AudioBuffer::new(16_000);
        if !*self.empty.lock() {
            buffer.push_samples(&vec![1200i16; 1600]);
        }
        buffer.to_payload()
    }

    fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.events.subscribe()
    }
}

/// How the fake inference service answers.
pub enum Reply {
    Answer(InferenceResult),
    Fail(DomainError),
    /// Never answers.
    Hang,
}

pub struct FakeInference {
    reply: Reply,
    calls: AtomicUsize,
    requests: Mutex<Vec<(usize, String, String)>>,
}

impl FakeInference {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn answering(transcription: &str, response: &str) -> Self {
        Self::new(Reply::Answer(InferenceResult::new(transcription, response)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// (payload bytes, user id, session id) per call.
    pub fn requests(&self) -> Vec<(usize, String, String)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl InferenceClient for FakeInference {
    async fn infer(
        &self,
        payload: &AudioPayload,
        user_id: &str,
        session_id: &str,
    ) -> Result<InferenceResult, DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .push((payload.len(), user_id.to_string(), session_id.to_string()));

        match &self.reply {
            Reply::Answer(result) => Ok(result.clone()),
            Reply::Fail(error) => Err(error.clone()),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Speech backend that records what it was asked to say.
///
/// Gated backends keep playing until `release()` or cancellation.
pub struct RecordingBackend {
    gated: bool,
    failure: Option<DomainError>,
    spoken: Mutex<Vec<String>>,
    cancelled: AtomicUsize,
    release: Notify,
}

impl RecordingBackend {
    pub fn instant() -> Self {
        Self::build(false, None)
    }

    pub fn gated() -> Self {
        Self::build(true, None)
    }

    pub fn failing(error: DomainError) -> Self {
        Self::build(false, Some(error))
    }

    fn build(gated: bool, failure: Option<DomainError>) -> Self {
        Self {
            gated,
            failure,
            spoken: Mutex::new(Vec::new()),
            cancelled: AtomicUsize::new(0),
            release: Notify::new(),
        }
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn render(&self, text: &str, cancel: CancellationToken) -> Result<(), DomainError> {
        self.spoken.lock().push(text.to_string());
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        if !self.gated {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(DomainError::Cancelled)
            }
            _ = self.release.notified() => Ok(()),
        }
    }
}

pub fn settings(timeout: Duration, max_recording: Option<Duration>) -> SessionSettings {
    SessionSettings {
        identity: SessionIdentity::new("u1", "s1"),
        inference_timeout: timeout,
        max_recording,
    }
}

pub fn speech_for(backend: &Arc<RecordingBackend>) -> Option<Arc<dyn SpeechOutput>> {
    let backend: Arc<dyn SpeechBackend> = backend.clone();
    Some(Arc::new(SpeechPlayer::new(backend)))
}

pub fn controller(
    capture: &Arc<FakeCapture>,
    inference: &Arc<FakeInference>,
    speech: Option<Arc<dyn SpeechOutput>>,
) -> SessionController {
    SessionController::new(
        capture.clone(),
        inference.clone(),
        speech,
        settings(Duration::from_secs(30), None),
    )
}

/// Wait until the controller reports `phase`.
pub async fn wait_for_phase(session: &SessionController, phase: Phase) {
    let mut rx: watch::Receiver<Phase> = session.subscribe_phase();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|p| *p == phase))
        .await
        .expect("timed out waiting for phase")
        .expect("phase channel closed");
}

/// Drain already-published events.
pub fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Destination phases of all `PhaseChanged` events, in order.
pub fn phases(events: &[SessionEvent]) -> Vec<Phase> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::PhaseChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}
