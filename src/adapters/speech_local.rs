use std::io::ErrorKind as IoErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::config::LocalSpeechConfig;
use crate::domain::DomainError;
use crate::ports::SpeechBackend;

/// Words per minute at rate 1.0.
const BASE_WORDS_PER_MINUTE: f32 = 175.0;

/// Characters of stderr kept in a failure message.
const STDERR_TAIL_CHARS: usize = 300;

/// Speaks through a local synthesizer process that plays to the speaker itself.
pub struct LocalSpeechBackend {
    config: LocalSpeechConfig,
}

impl LocalSpeechBackend {
    pub fn new(config: LocalSpeechConfig) -> Self {
        info!(program = %config.program, voice = ?config.voice, "LocalSpeechBackend created");
        Self { config }
    }
}

#[async_trait]
impl SpeechBackend for LocalSpeechBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn render(&self, text: &str, cancel: CancellationToken) -> Result<(), DomainError> {
        let args = build_args(&self.config, text);
        debug!(program = %self.config.program, ?args, "Spawning synthesizer");

        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                IoErrorKind::NotFound => DomainError::device(format!(
                    "Synthesizer '{}' not found",
                    self.config.program
                )),
                _ => DomainError::Synthesis(format!("Failed to spawn synthesizer: {}", e)),
            })?;

        // Drained while the process runs so a chatty synthesizer never blocks
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut bytes = Vec::new();
                let _ = pipe.read_to_end(&mut bytes).await;
                bytes
            })
        });

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to stop synthesizer");
                }
                if let Some(task) = stderr {
                    task.abort();
                }
                return Err(DomainError::Cancelled);
            }
            status = child.wait() => status?,
        };

        let detail = match stderr {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if status.success() {
            return Ok(());
        }

        let code = status.code().unwrap_or(-1);
        Err(DomainError::Synthesis(format!(
            "Synthesizer exited with code {}: {}",
            code,
            stderr_tail(&detail)
        )))
    }
}

/// Tail of the synthesizer's stderr for error messages.
fn stderr_tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL_CHARS - 1)
        .map_or(0, |(i, _)| i);
    text[start..].to_string()
}

/// espeak-ng style arguments for the configured voice parameters.
fn build_args(config: &LocalSpeechConfig, text: &str) -> Vec<String> {
    let speed = (BASE_WORDS_PER_MINUTE * config.rate).round().max(1.0) as u32;
    let pitch = (config.pitch * 50.0).round().clamp(0.0, 99.0) as u32;
    let amplitude = (config.volume * 100.0).round().clamp(0.0, 200.0) as u32;

    let mut args = vec![
        "-s".to_string(),
        speed.to_string(),
        "-p".to_string(),
        pitch.to_string(),
        "-a".to_string(),
        amplitude.to_string(),
    ];
    if let Some(voice) = config.voice.as_deref().filter(|v| !v.is_empty()) {
        args.push("-v".to_string());
        args.push(voice.to_string());
    }
    // End of options so text starting with '-' is not read as a flag
    args.push("--".to_string());
    args.push(text.to_string());
    args
}
