use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::domain::{
    sanitize_for_speech, AppConfig, AudioPayload, CaptureEvent, CaptureHandle, DomainError,
    InferenceResult, Phase, Session, SessionEvent, SessionIdentity, SessionSnapshot,
    SpeechSkipReason,
};
use crate::ports::{AudioCapture, InferenceClient, SpeechHandle, SpeechOutcome, SpeechOutput};

/// Whether a command changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Accepted,
    /// The command is not valid in the current phase and had no effect.
    Ignored(Phase),
}

/// Per-controller settings derived from the app configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub identity: SessionIdentity,
    pub inference_timeout: Duration,
    /// Recording is stopped automatically after this long.
    pub max_recording: Option<Duration>,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            identity: SessionIdentity::new(
                config.session.user_id.clone(),
                config.session.session_id.clone(),
            ),
            inference_timeout: config.inference.timeout(),
            max_recording: Some(Duration::from_secs(config.audio.max_duration_secs as u64)),
        }
    }
}

struct ControllerState {
    phase: Phase,
    /// A `begin()` is in flight; a second start is ignored.
    starting: bool,
    next_cycle: u64,
    session: Option<Session>,
    capture: Option<CaptureHandle>,
    speech: Option<SpeechHandle>,
    /// Cancelled when the current cycle ends for any reason.
    cancel: CancellationToken,
}

impl ControllerState {
    fn cycle(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.cycle)
    }

    fn is_current(&self, cycle: u64) -> bool {
        self.cycle() == Some(cycle)
    }
}

/// Clears `starting` if a `start()` future is dropped while `begin()` is
/// pending.
struct StartingGuard<'a> {
    state: &'a Mutex<ControllerState>,
    armed: bool,
}

impl<'a> StartingGuard<'a> {
    fn new(state: &'a Mutex<ControllerState>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Start dropped while acquiring the microphone");
            self.state.lock().starting = false;
        }
    }
}

struct Inner {
    capture: Arc<dyn AudioCapture>,
    inference: Arc<dyn InferenceClient>,
    speech: Option<Arc<dyn SpeechOutput>>,
    settings: SessionSettings,
    state: Mutex<ControllerState>,
    phase_tx: watch::Sender<Phase>,
    events: broadcast::Sender<SessionEvent>,
}

/// Drives one recording, transcription, response and speech cycle at a time.
///
/// The controller is the only writer of the phase. Every path out of a
/// cycle returns to `Idle` and releases whatever device the cycle owned.
/// Results that arrive for a cycle which is no longer current are dropped.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        capture: Arc<dyn AudioCapture>,
        inference: Arc<dyn InferenceClient>,
        speech: Option<Arc<dyn SpeechOutput>>,
        settings: SessionSettings,
    ) -> Self {
        let (phase_tx, _) = watch::channel(Phase::Idle);
        let (events, _) = broadcast::channel(64);

        info!(
            user_id = %settings.identity.user_id,
            session_id = %settings.identity.session_id,
            timeout_secs = settings.inference_timeout.as_secs(),
            speech = speech.is_some(),
            "SessionController initialized"
        );

        Self {
            inner: Arc::new(Inner {
                capture,
                inference,
                speech,
                settings,
                state: Mutex::new(ControllerState {
                    phase: Phase::Idle,
                    starting: false,
                    next_cycle: 0,
                    session: None,
                    capture: None,
                    speech: None,
                    cancel: CancellationToken::new(),
                }),
                phase_tx,
                events,
            }),
        }
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    /// Watch phase changes. The receiver always holds the latest phase.
    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.inner.phase_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn current_session(&self) -> Option<SessionSnapshot> {
        let state = self.inner.state.lock();
        state.session.as_ref().map(|s| s.snapshot(state.phase))
    }

    /// Begin recording a new cycle.
    ///
    /// Ignored unless `Idle`. If the microphone cannot be acquired the
    /// controller stays `Idle` and the error is published and returned.
    pub async fn start(&self) -> Result<Ack, DomainError> {
        let (cycle, cancel) = {
            let mut state = self.inner.state.lock();
            if !state.phase.can_start() || state.starting {
                debug!(phase = %state.phase, "Start ignored");
                return Ok(Ack::Ignored(state.phase));
            }
            state.starting = true;
            state.next_cycle += 1;
            state.cancel = CancellationToken::new();
            (state.next_cycle, state.cancel.clone())
        };

        let mut starting = StartingGuard::new(&self.inner.state);
        let begun = self.inner.capture.begin().await;

        let handle = {
            let mut state = self.inner.state.lock();
            state.starting = false;
            starting.disarm();

            match begun {
                Err(e) => {
                    drop(state);
                    warn!(cycle, error = %e, "Failed to acquire microphone");
                    self.publish_error(cycle, &e);
                    return Err(e);
                }
                Ok(handle) if !cancel.is_cancelled() => {
                    state.capture = Some(handle);
                    state.session = Some(Session::new(cycle, self.inner.settings.identity.clone()));
                    self.transition(&mut state, Phase::Recording)?;
                    None
                }
                // Abandoned while the device was being acquired
                Ok(handle) => Some(handle),
            }
        };

        if let Some(handle) = handle {
            debug!(cycle, "Releasing capture acquired after abandon");
            self.release_capture(handle).await;
            return Err(DomainError::Cancelled);
        }

        info!(cycle, "Recording");
        self.arm_recording_limit(cycle, cancel);
        Ok(Ack::Accepted)
    }

    /// Stop recording and run inference and speech for the cycle.
    ///
    /// Returns once the cycle reached `Speaking` or `Idle`.
    pub async fn stop(&self) -> Result<Ack, DomainError> {
        self.stop_where(|_| true).await
    }

    /// Stop speaking and return to `Idle`. Only accepted while `Speaking`.
    pub fn stop_speaking(&self) -> Ack {
        let handle = {
            let mut state = self.inner.state.lock();
            if !state.phase.can_stop_speaking() {
                return Ack::Ignored(state.phase);
            }
            let handle = state.speech.take();
            if let Err(e) = self.transition(&mut state, Phase::Idle) {
                warn!(error = %e, "Unexpected transition failure");
            }
            handle
        };

        if let (Some(handle), Some(speech)) = (handle, self.inner.speech.as_ref()) {
            info!(speech_id = handle.id(), "Speech stopped by user");
            speech.cancel(&handle);
        }
        Ack::Accepted
    }

    /// Tear down the current cycle from any phase.
    ///
    /// Cancels in-flight inference, releases the microphone and stops speech.
    pub async fn abandon(&self) {
        let (capture, speech) = {
            let mut state = self.inner.state.lock();
            state.cancel.cancel();
            if state.phase == Phase::Idle {
                return;
            }
            info!(cycle = ?state.cycle(), phase = %state.phase, "Abandoning session");
            let capture = state.capture.take();
            let speech = state.speech.take();
            if let Err(e) = self.transition(&mut state, Phase::Idle) {
                warn!(error = %e, "Unexpected transition failure");
            }
            (capture, speech)
        };

        if let (Some(handle), Some(output)) = (speech, self.inner.speech.as_ref()) {
            output.cancel(&handle);
        }
        if let Some(handle) = capture {
            self.release_capture(handle).await;
        }
    }

    /// React to a device-initiated capture event.
    pub async fn handle_capture_event(&self, event: CaptureEvent) {
        match event {
            CaptureEvent::BufferFull { capture_id } => {
                info!(capture_id, "Capture buffer full, stopping");
                let _ = self
                    .stop_where(|s| s.capture.as_ref().map(CaptureHandle::id) == Some(capture_id))
                    .await;
            }
            CaptureEvent::DeviceLost {
                capture_id,
                message,
            } => {
                self.capture_failed(capture_id, DomainError::device(message))
                    .await;
            }
        }
    }

    async fn stop_where(
        &self,
        matches: impl FnOnce(&ControllerState) -> bool,
    ) -> Result<Ack, DomainError> {
        let (cycle, handle, cancel) = {
            let mut state = self.inner.state.lock();
            if !state.phase.can_stop_recording() || !matches(&state) {
                debug!(phase = %state.phase, "Stop ignored");
                return Ok(Ack::Ignored(state.phase));
            }
            let (Some(cycle), Some(handle)) = (state.cycle(), state.capture.take()) else {
                return Ok(Ack::Ignored(state.phase));
            };
            self.transition(&mut state, Phase::Processing)?;
            (cycle, handle, state.cancel.clone())
        };

        self.process(cycle, handle, cancel)
            .instrument(info_span!("cycle", cycle))
            .await
    }

    async fn process(
        &self,
        cycle: u64,
        handle: CaptureHandle,
        cancel: CancellationToken,
    ) -> Result<Ack, DomainError> {
        let payload = match self.inner.capture.end(handle).await {
            Ok(payload) => Arc::new(payload),
            Err(e) => return self.fail(cycle, e),
        };

        {
            let mut state = self.inner.state.lock();
            if let Some(session) = state.session.as_mut().filter(|s| s.cycle == cycle) {
                session.captured_audio = Some(Arc::clone(&payload));
            }
        }

        let result = self.infer(&payload, cancel).await;

        let result = {
            let mut state = self.inner.state.lock();
            if !state.is_current(cycle) || state.phase != Phase::Processing {
                debug!(cycle, "Dropping inference result for a superseded session");
                return Err(DomainError::Cancelled);
            }
            match result {
                Ok(result) => {
                    if let Some(session) = state.session.as_mut() {
                        session.transcription = Some(result.transcription.clone());
                        session.response_text = Some(result.response_text.clone());
                    }
                    let _ = self.inner.events.send(SessionEvent::Answered {
                        cycle,
                        transcription: result.transcription.clone(),
                        response: result.response_text.clone(),
                    });
                    result
                }
                Err(e) => {
                    drop(state);
                    return self.fail(cycle, e);
                }
            }
        };

        self.respond(cycle, result).await
    }

    async fn infer(
        &self,
        payload: &AudioPayload,
        cancel: CancellationToken,
    ) -> Result<InferenceResult, DomainError> {
        let identity = &self.inner.settings.identity;
        let timeout = self.inner.settings.inference_timeout;
        let request = self
            .inner
            .inference
            .infer(payload, &identity.user_id, &identity.session_id);

        tokio::select! {
            _ = cancel.cancelled() => Err(DomainError::Cancelled),
            result = tokio::time::timeout(timeout, request) => match result {
                Ok(result) => result,
                Err(_) => Err(DomainError::Timeout { secs: timeout.as_secs() }),
            },
        }
    }

    async fn respond(&self, cycle: u64, result: InferenceResult) -> Result<Ack, DomainError> {
        if !result.has_response() {
            return self.skip_speech(cycle, SpeechSkipReason::EmptyResponse);
        }
        let Some(speech) = self.inner.speech.clone() else {
            return self.skip_speech(cycle, SpeechSkipReason::SpeechDisabled);
        };
        let text = sanitize_for_speech(&result.response_text);
        if text.is_empty() {
            return self.skip_speech(cycle, SpeechSkipReason::EmptyResponse);
        }

        let handle = match speech.speak(&text).await {
            Ok(handle) => handle,
            Err(e) => return self.fail(cycle, e),
        };

        {
            let mut state = self.inner.state.lock();
            if !state.is_current(cycle) || state.phase != Phase::Processing {
                drop(state);
                debug!(cycle, "Session superseded before speech started");
                speech.cancel(&handle);
                return Err(DomainError::Cancelled);
            }
            state.speech = Some(handle.clone());
            self.transition(&mut state, Phase::Speaking)?;
        }

        let controller = self.clone();
        tokio::spawn(async move {
            let outcome = handle.finished().await;
            controller.speech_finished(cycle, handle.id(), outcome);
        });

        Ok(Ack::Accepted)
    }

    fn speech_finished(&self, cycle: u64, speech_id: u64, outcome: SpeechOutcome) {
        let mut state = self.inner.state.lock();
        let is_active = state.is_current(cycle)
            && state.phase == Phase::Speaking
            && state.speech.as_ref().map(SpeechHandle::id) == Some(speech_id);
        if !is_active {
            debug!(cycle, speech_id, ?outcome, "Ignoring outcome of released speech");
            return;
        }

        state.speech = None;
        if let Err(e) = self.transition(&mut state, Phase::Idle) {
            warn!(error = %e, "Unexpected transition failure");
        }
        match outcome {
            SpeechOutcome::Completed => info!(cycle, "Speech completed"),
            SpeechOutcome::Cancelled => info!(cycle, "Speech cancelled"),
            SpeechOutcome::Failed(e) => {
                warn!(cycle, error = %e, "Speech failed, response was still delivered");
                self.publish_error(cycle, &e);
            }
        }
    }

    fn skip_speech(&self, cycle: u64, reason: SpeechSkipReason) -> Result<Ack, DomainError> {
        let mut state = self.inner.state.lock();
        if !state.is_current(cycle) || state.phase != Phase::Processing {
            return Err(DomainError::Cancelled);
        }
        info!(cycle, ?reason, "Not speaking response");
        let _ = self
            .inner
            .events
            .send(SessionEvent::SpeechSkipped { cycle, reason });
        self.transition(&mut state, Phase::Idle)?;
        Ok(Ack::Accepted)
    }

    /// Return a processing cycle to `Idle` with an error.
    fn fail(&self, cycle: u64, error: DomainError) -> Result<Ack, DomainError> {
        let mut state = self.inner.state.lock();
        if !state.is_current(cycle) || state.phase != Phase::Processing {
            debug!(cycle, error = %error, "Dropping error for a superseded session");
            return Err(error);
        }
        warn!(cycle, error = %error, kind = ?error.kind(), "Session failed");
        self.transition(&mut state, Phase::Idle)?;
        self.publish_error(cycle, &error);
        Err(error)
    }

    async fn capture_failed(&self, capture_id: u64, error: DomainError) {
        let handle = {
            let mut state = self.inner.state.lock();
            let owns_capture =
                state.capture.as_ref().map(CaptureHandle::id) == Some(capture_id);
            if state.phase != Phase::Recording || !owns_capture {
                return;
            }
            let cycle = state.cycle().unwrap_or_default();
            warn!(cycle, capture_id, error = %error, "Capture device failed");
            let handle = state.capture.take();
            if let Err(e) = self.transition(&mut state, Phase::Idle) {
                warn!(error = %e, "Unexpected transition failure");
            }
            self.publish_error(cycle, &error);
            handle
        };

        if let Some(handle) = handle {
            self.release_capture(handle).await;
        }
    }

    fn arm_recording_limit(&self, cycle: u64, cancel: CancellationToken) {
        let Some(limit) = self.inner.settings.max_recording else {
            return;
        };
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(limit) => {
                    info!(cycle, limit_secs = limit.as_secs(), "Maximum recording duration reached");
                    let _ = controller
                        .stop_where(|s| s.is_current(cycle))
                        .await;
                }
            }
        });
    }

    async fn release_capture(&self, handle: CaptureHandle) {
        match self.inner.capture.end(handle).await {
            Ok(_) | Err(DomainError::EmptyCapture) => {}
            Err(e) => warn!(error = %e, "Failed to release capture"),
        }
    }

    fn publish_error(&self, cycle: u64, error: &DomainError) {
        let _ = self.inner.events.send(SessionEvent::Error {
            cycle,
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    /// Apply a phase change and publish it. Leaving for `Idle` ends the cycle.
    fn transition(&self, state: &mut ControllerState, to: Phase) -> Result<(), DomainError> {
        let from = state.phase;
        from.check_transition(to)?;

        let cycle = state.cycle().unwrap_or_default();
        state.phase = to;
        if to == Phase::Idle {
            state.cancel.cancel();
            state.session = None;
            state.speech = None;
        }

        debug!(cycle, %from, %to, "Phase changed");
        let _ = self
            .inner
            .events
            .send(SessionEvent::PhaseChanged { cycle, from, to });
        self.inner.phase_tx.send_replace(to);
        Ok(())
    }
}
