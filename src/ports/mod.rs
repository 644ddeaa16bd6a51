pub mod audio;
pub mod config;
pub mod inference;
pub mod speech;
pub mod token;

pub use audio::AudioCapture;
pub use config::ConfigStore;
pub use inference::InferenceClient;
pub use speech::{AudioSink, SpeechBackend, SpeechHandle, SpeechOutcome, SpeechOutput};
pub use token::{Clock, SystemClock, TokenSource};
