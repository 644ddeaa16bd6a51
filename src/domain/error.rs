use serde::Serialize;
use thiserror::Error;

use crate::domain::session::Phase;

/// Domain-level errors for the voice session.
#[derive(Error, Debug, Clone)]
pub enum DomainError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Audio device unavailable: {message}")]
    DeviceUnavailable { message: String },

    #[error("A capture is already open")]
    CaptureAlreadyOpen,

    #[error("No capture is open for this handle")]
    CaptureNotOpen,

    #[error("No audio was captured")]
    EmptyCapture,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Speech token unavailable: {0}")]
    TokenUnavailable(String),

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("Invalid session transition from {from:?} to {to:?}")]
    PhaseTransition { from: Phase, to: Phase },
}

/// Coarse error classification surfaced to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DeviceUnavailable,
    EmptyCapture,
    Network,
    Timeout,
    Synthesis,
    Internal,
}

impl DomainError {
    /// Classify this error for presentation.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::DeviceUnavailable { .. }
            | DomainError::CaptureAlreadyOpen
            | DomainError::CaptureNotOpen => ErrorKind::DeviceUnavailable,
            DomainError::EmptyCapture => ErrorKind::EmptyCapture,
            DomainError::Network(_) => ErrorKind::Network,
            DomainError::Timeout { .. } => ErrorKind::Timeout,
            DomainError::Synthesis(_) | DomainError::TokenUnavailable(_) => ErrorKind::Synthesis,
            DomainError::Config(_)
            | DomainError::Serialization(_)
            | DomainError::Io(_)
            | DomainError::Cancelled
            | DomainError::PhaseTransition { .. } => ErrorKind::Internal,
        }
    }

    pub(crate) fn device(message: impl Into<String>) -> Self {
        DomainError::DeviceUnavailable {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for DomainError {
    fn from(err: toml::de::Error) -> Self {
        DomainError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DomainError {
    fn from(err: toml::ser::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl From<hound::Error> for DomainError {
    fn from(err: hound::Error) -> Self {
        DomainError::Serialization(format!("WAV encoding: {}", err))
    }
}
