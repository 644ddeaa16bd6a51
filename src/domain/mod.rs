pub mod audio;
pub mod config;
pub mod error;
pub mod inference;
pub mod session;
pub mod text;
pub mod token;

pub use audio::{
    AtomicCaptureState, AudioBuffer, AudioConfig, AudioPayload, CaptureEvent, CaptureHandle,
    CaptureState, SPEECH_SAMPLE_RATE,
};
pub use config::AppConfig;
pub use error::{DomainError, ErrorKind};
pub use inference::InferenceResult;
pub use session::{
    Phase, Session, SessionEvent, SessionIdentity, SessionSnapshot, SpeechSkipReason,
};
pub use text::sanitize_for_speech;
pub use token::AuthToken;
