use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::audio::{AudioConfig, SPEECH_SAMPLE_RATE};
use crate::domain::error::DomainError;

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level for this crate: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Write daily session logs next to the config file.
    pub file_logging: bool,
    /// Number of daily log files kept before the oldest is removed.
    pub keep_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: true,
            keep_files: 7,
        }
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Identity sent with every inference request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub user_id: String,
    /// Conversation identifier on the inference service.
    pub session_id: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_id: "user".to_string(),
            session_id: "default".to_string(),
        }
    }
}

/// Remote inference endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Multipart upload endpoint.
    pub url: String,
    /// Upper bound for one Processing phase, retries included.
    pub timeout_secs: u64,
    /// Extra attempts on connectivity or 5xx failures.
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each attempt.
    pub retry_backoff_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000/api/process_audio".to_string(),
            timeout_secs: 30,
            max_retries: 0,
            retry_backoff_ms: 500,
        }
    }
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which synthesis backend speaks responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechBackendKind {
    Cloud,
    Local,
    Disabled,
}

/// Cloud synthesis backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSpeechConfig {
    /// Endpoint returning `{token, region}`.
    pub token_url: String,
    /// Cached token lifetime.
    pub token_ttl_secs: u64,
    /// Synthesis endpoint; `{region}` is replaced with the token's region.
    pub endpoint_template: String,
    pub voice_name: String,
    /// Requested audio format (must be a RIFF PCM format).
    pub output_format: String,
}

impl Default for CloudSpeechConfig {
    fn default() -> Self {
        Self {
            token_url: "http://localhost:3001/api/get-speech-token".to_string(),
            token_ttl_secs: 9 * 60,
            endpoint_template: "https://{region}.tts.speech.microsoft.com/cognitiveservices/v1"
                .to_string(),
            voice_name: "en-US-JennyNeural".to_string(),
            output_format: "riff-24khz-16bit-mono-pcm".to_string(),
        }
    }
}

impl CloudSpeechConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn endpoint_for(&self, region: &str) -> String {
        self.endpoint_template.replace("{region}", region)
    }
}

/// Local synthesizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSpeechConfig {
    /// Synthesizer executable (espeak-ng compatible flags).
    pub program: String,
    /// Speaking rate multiplier, 1.0 is normal.
    pub rate: f32,
    /// Pitch multiplier, 1.0 is normal.
    pub pitch: f32,
    /// Volume, 0.0 - 1.0.
    pub volume: f32,
    /// Preferred voice name, engine default if None.
    pub voice: Option<String>,
}

impl Default for LocalSpeechConfig {
    fn default() -> Self {
        Self {
            program: "espeak-ng".to_string(),
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
            voice: None,
        }
    }
}

/// Speech output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub backend: SpeechBackendKind,
    pub cloud: CloudSpeechConfig,
    pub local: LocalSpeechConfig,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            backend: SpeechBackendKind::Local,
            cloud: CloudSpeechConfig::default(),
            local: LocalSpeechConfig::default(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub session: SessionConfig,
    pub audio: AudioConfig,
    pub inference: InferenceConfig,
    pub speech: SpeechConfig,
}

impl AppConfig {
    /// Create a new AppConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject values the adapters cannot work with.
    pub fn validate(&self) -> Result<(), DomainError> {
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(DomainError::Config(format!(
                "logging.level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.logging.level
            )));
        }
        if self.logging.file_logging && self.logging.keep_files == 0 {
            return Err(DomainError::Config(
                "logging.keep_files must be greater than 0".to_string(),
            ));
        }

        check_url("inference.url", &self.inference.url)?;

        if self.inference.timeout_secs == 0 {
            return Err(DomainError::Config(
                "inference.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.session.user_id.trim().is_empty() || self.session.session_id.trim().is_empty() {
            return Err(DomainError::Config(
                "session.user_id and session.session_id must not be empty".to_string(),
            ));
        }
        if self.audio.sample_rate != SPEECH_SAMPLE_RATE {
            return Err(DomainError::Config(format!(
                "audio.sample_rate must be {} (got {})",
                SPEECH_SAMPLE_RATE, self.audio.sample_rate
            )));
        }
        if self.audio.max_duration_secs == 0 {
            return Err(DomainError::Config(
                "audio.max_duration_secs must be greater than 0".to_string(),
            ));
        }

        match self.speech.backend {
            SpeechBackendKind::Cloud => {
                let cloud = &self.speech.cloud;
                check_url("speech.cloud.token_url", &cloud.token_url)?;
                check_url(
                    "speech.cloud.endpoint_template",
                    &cloud.endpoint_for("region"),
                )?;
                if cloud.token_ttl_secs == 0 {
                    return Err(DomainError::Config(
                        "speech.cloud.token_ttl_secs must be greater than 0".to_string(),
                    ));
                }
            }
            SpeechBackendKind::Local => {
                let local = &self.speech.local;
                if local.program.trim().is_empty() {
                    return Err(DomainError::Config(
                        "speech.local.program must not be empty".to_string(),
                    ));
                }
                if !(0.1..=10.0).contains(&local.rate)
                    || !(0.0..=2.0).contains(&local.pitch)
                    || !(0.0..=1.0).contains(&local.volume)
                {
                    return Err(DomainError::Config(format!(
                        "speech.local out of range: rate {} (0.1-10), pitch {} (0-2), volume {} (0-1)",
                        local.rate, local.pitch, local.volume
                    )));
                }
            }
            SpeechBackendKind::Disabled => {}
        }

        Ok(())
    }
}

fn check_url(field: &str, value: &str) -> Result<(), DomainError> {
    let parsed = Url::parse(value)
        .map_err(|e| DomainError::Config(format!("{}: invalid URL '{}': {}", field, value, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(DomainError::Config(format!(
            "{}: unsupported scheme '{}'",
            field, other
        ))),
    }
}
