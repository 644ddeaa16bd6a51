use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::domain::audio::AudioPayload;
use crate::domain::error::{DomainError, ErrorKind};

/// Interaction phase of the session controller.
///
/// State transitions:
/// - Idle -> Recording (start, capture acquired)
/// - Recording -> Processing (user stop, or device-signalled stop)
/// - Recording -> Idle (device failure, abandon)
/// - Processing -> Speaking (non-empty response, speech started)
/// - Processing -> Idle (empty response, failure, timeout, abandon)
/// - Speaking -> Idle (completed, cancelled, failed, stop-speaking)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Recording,
    Processing,
    Speaking,
}

impl Phase {
    #[must_use]
    pub fn can_start(&self) -> bool {
        matches!(self, Phase::Idle)
    }

    #[must_use]
    pub fn can_stop_recording(&self) -> bool {
        matches!(self, Phase::Recording)
    }

    #[must_use]
    pub fn can_stop_speaking(&self) -> bool {
        matches!(self, Phase::Speaking)
    }

    /// Whether `to` is a legal successor of this phase.
    #[must_use]
    pub fn can_transition_to(&self, to: Phase) -> bool {
        matches!(
            (self, to),
            (Phase::Idle, Phase::Recording)
                | (Phase::Recording, Phase::Processing)
                | (Phase::Recording, Phase::Idle)
                | (Phase::Processing, Phase::Speaking)
                | (Phase::Processing, Phase::Idle)
                | (Phase::Speaking, Phase::Idle)
        )
    }

    pub fn check_transition(&self, to: Phase) -> Result<(), DomainError> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(DomainError::PhaseTransition { from: *self, to })
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Recording => "recording",
            Phase::Processing => "processing",
            Phase::Speaking => "speaking",
        };
        f.write_str(name)
    }
}

/// Identifiers supplied by the embedding application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub user_id: String,
    pub session_id: String,
}

impl SessionIdentity {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

/// One recording -> transcription -> response -> speech cycle.
///
/// Lives only in memory and is discarded when the cycle returns to Idle.
#[derive(Debug)]
pub struct Session {
    /// Monotonic identity used to drop results of superseded cycles.
    pub cycle: u64,
    pub identity: SessionIdentity,
    pub started_at: Instant,
    pub captured_audio: Option<Arc<AudioPayload>>,
    pub transcription: Option<String>,
    pub response_text: Option<String>,
}

impl Session {
    pub fn new(cycle: u64, identity: SessionIdentity) -> Self {
        Self {
            cycle,
            identity,
            started_at: Instant::now(),
            captured_audio: None,
            transcription: None,
            response_text: None,
        }
    }

    pub fn snapshot(&self, phase: Phase) -> SessionSnapshot {
        SessionSnapshot {
            cycle: self.cycle,
            user_id: self.identity.user_id.clone(),
            session_id: self.identity.session_id.clone(),
            phase,
            audio_bytes: self.captured_audio.as_ref().map(|a| a.len()),
            transcription: self.transcription.clone(),
            response_text: self.response_text.clone(),
        }
    }
}

/// Read-only view of the active session for observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub cycle: u64,
    pub user_id: String,
    pub session_id: String,
    pub phase: Phase,
    pub audio_bytes: Option<usize>,
    pub transcription: Option<String>,
    pub response_text: Option<String>,
}

/// Why a cycle finished without speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechSkipReason {
    EmptyResponse,
    SpeechDisabled,
}

/// Events published by the session controller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionEvent {
    /// The controller phase changed.
    PhaseChanged { cycle: u64, from: Phase, to: Phase },
    /// Inference returned a transcription and a response.
    Answered {
        cycle: u64,
        transcription: String,
        response: String,
    },
    /// The response will not be spoken.
    SpeechSkipped { cycle: u64, reason: SpeechSkipReason },
    /// An operation failed; the controller is back in Idle.
    Error {
        cycle: u64,
        kind: ErrorKind,
        message: String,
    },
}
