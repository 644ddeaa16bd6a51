use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::adapters::{
    CloudSpeechBackend, CpalAudioCapture, CpalAudioSink, HttpInferenceClient, HttpTokenSource,
    LocalSpeechBackend, SpeechPlayer, TomlConfigStore,
};
use crate::app::{SessionController, SessionSettings, TokenCache};
use crate::domain::config::{SpeechBackendKind, SpeechConfig};
use crate::domain::{AppConfig, DomainError};
use crate::infrastructure::init_logging;
use crate::ports::{AudioCapture, ConfigStore, SpeechBackend, SpeechOutput};

/// Command-line overrides applied on top of the stored configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_dir: Option<PathBuf>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub inference_url: Option<String>,
    pub speech_backend: Option<SpeechBackendKind>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(user_id) = &self.user_id {
            config.session.user_id = user_id.clone();
        }
        if let Some(session_id) = &self.session_id {
            config.session.session_id = session_id.clone();
        }
        if let Some(url) = &self.inference_url {
            config.inference.url = url.clone();
        }
        if let Some(backend) = self.speech_backend {
            config.speech.backend = backend;
        }
    }
}

/// Application controller that wires configuration, logging and adapters
/// into a session controller.
pub struct AppController {
    config_store: TomlConfigStore,
    session: SessionController,
    inference: Arc<HttpInferenceClient>,
    capture_forwarder: JoinHandle<()>,
    _log_guard: Option<WorkerGuard>,
}

impl AppController {
    /// Initialize the application. Must be called inside a tokio runtime.
    pub fn new(overrides: ConfigOverrides) -> Result<Self, DomainError> {
        let config_store = match &overrides.config_dir {
            Some(dir) => TomlConfigStore::with_dir(dir)?,
            None => TomlConfigStore::new()?,
        };

        let mut config = config_store.load()?;
        overrides.apply(&mut config);
        config.validate()?;

        let log_guard = init_logging(&config_store.logs_dir(), &config.logging)?;

        info!("HopeVoice starting up");

        let capture = Arc::new(CpalAudioCapture::new(config.audio.clone())?);
        let inference = Arc::new(HttpInferenceClient::new(&config.inference)?);
        let speech = build_speech_output(&config.speech)?;

        let session = SessionController::new(
            capture.clone(),
            inference.clone(),
            speech,
            SessionSettings::from_config(&config),
        );
        let capture_forwarder = spawn_capture_forwarder(capture, session.clone());

        info!(
            inference_url = %config.inference.url,
            speech_backend = ?config.speech.backend,
            "AppController initialized"
        );

        Ok(Self {
            config_store,
            session,
            inference,
            capture_forwarder,
            _log_guard: log_guard,
        })
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    /// Probe the inference service.
    pub async fn check_health(&self) -> Result<(), DomainError> {
        self.inference.health().await
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_store.config_path()
    }
}

impl Drop for AppController {
    fn drop(&mut self) {
        self.capture_forwarder.abort();
    }
}

/// Build the speech output chosen by configuration, `None` when disabled.
pub fn build_speech_output(
    config: &SpeechConfig,
) -> Result<Option<Arc<dyn SpeechOutput>>, DomainError> {
    let backend: Arc<dyn SpeechBackend> = match config.backend {
        SpeechBackendKind::Disabled => {
            info!("Speech output disabled");
            return Ok(None);
        }
        SpeechBackendKind::Local => Arc::new(LocalSpeechBackend::new(config.local.clone())),
        SpeechBackendKind::Cloud => {
            let source = Arc::new(HttpTokenSource::new(config.cloud.token_url.clone())?);
            let tokens = Arc::new(TokenCache::new(source, config.cloud.token_ttl()));
            Arc::new(CloudSpeechBackend::new(
                config.cloud.clone(),
                tokens,
                Arc::new(CpalAudioSink::new()),
            )?)
        }
    };

    Ok(Some(Arc::new(SpeechPlayer::new(backend))))
}

/// Forward device-initiated capture events to the session controller.
pub fn spawn_capture_forwarder(
    capture: Arc<dyn AudioCapture>,
    session: SessionController,
) -> JoinHandle<()> {
    let mut events = capture.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => session.handle_capture_event(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Capture event forwarder lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
