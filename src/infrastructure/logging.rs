use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::config::LoggingConfig;
use crate::domain::DomainError;

/// Prefix of the daily session log files (`hope-voice.YYYY-MM-DD.log`).
const LOG_FILE_PREFIX: &str = "hope-voice";

/// Filter directive for the configured level; other crates log warnings only.
pub fn filter_directive(level: &str) -> String {
    format!("warn,hope_voice={}", level)
}

/// Initialize logging for the console session.
///
/// Console output goes to stderr so it never interleaves with the prompt on
/// stdout; `RUST_LOG` overrides the configured console level. When file
/// logging is on, JSON session logs rotate daily under `logs_dir` and only
/// the newest `keep_files` are kept. The returned guard flushes the file
/// writer on drop and must outlive the session.
pub fn init_logging(
    logs_dir: &Path,
    config: &LoggingConfig,
) -> Result<Option<WorkerGuard>, DomainError> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(&config.level)));

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    if !config.file_logging {
        let _ = tracing_subscriber::registry()
            .with(console_layer)
            .try_init();
        tracing::info!(level = %config.level, "Logging initialized (console only)");
        return Ok(None);
    }

    fs::create_dir_all(logs_dir)?;
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(config.keep_files)
        .build(logs_dir)
        .map_err(|e| DomainError::Io(format!("Failed to open session log: {}", e)))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Each processed cycle runs in a `cycle` span; its close event records the timing
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(EnvFilter::new(filter_directive(&config.level)));

    // try_init so a second call (tests, embedders) keeps the first subscriber
    if tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok()
    {
        tracing::info!(
            logs_dir = ?logs_dir,
            level = %config.level,
            keep_files = config.keep_files,
            "Logging initialized with session log files"
        );
    }

    Ok(Some(guard))
}
