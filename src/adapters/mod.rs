pub mod audio_cpal;
pub mod config_store;
pub mod http;
pub mod inference_http;
pub mod playback_cpal;
pub mod speech_cloud;
pub mod speech_local;
pub mod speech_player;
pub mod token_http;

pub use audio_cpal::CpalAudioCapture;
pub use config_store::TomlConfigStore;
pub use inference_http::HttpInferenceClient;
pub use playback_cpal::CpalAudioSink;
pub use speech_cloud::CloudSpeechBackend;
pub use speech_local::LocalSpeechBackend;
pub use speech_player::SpeechPlayer;
pub use token_http::HttpTokenSource;
