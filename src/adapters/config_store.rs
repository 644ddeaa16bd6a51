use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::domain::{AppConfig, DomainError};
use crate::ports::ConfigStore;

/// Directory name under the OS config directory.
const APP_DIR: &str = "hope-voice";

const CONFIG_FILE: &str = "config.toml";

/// Written above the defaults on first run.
const CONFIG_HEADER: &str = "\
# HopeVoice configuration.
# Command-line flags (--user-id, --session-id, --inference-url, --speech)
# override these values for one run without changing this file.

";

/// `config.toml` plus a `logs/` directory in one folder.
pub struct TomlConfigStore {
    dir: PathBuf,
}

impl TomlConfigStore {
    /// Store in `<os config dir>/hope-voice`, e.g. `~/.config/hope-voice`.
    pub fn new() -> Result<Self, DomainError> {
        let base = dirs::config_dir().ok_or_else(|| {
            DomainError::Config("Could not find the user config directory".to_string())
        })?;
        Self::with_dir(base.join(APP_DIR))
    }

    /// Store rooted at an explicit directory, e.g. from `--config-dir`.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = ?dir, "ConfigStore initialized");
        Ok(Self { dir })
    }

    fn parse(path: &Path, content: &str) -> Result<AppConfig, DomainError> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| DomainError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate().map_err(|e| match e {
            DomainError::Config(message) => {
                DomainError::Config(format!("{}: {}", path.display(), message))
            }
            other => other,
        })?;
        Ok(config)
    }
}

impl ConfigStore for TomlConfigStore {
    fn load(&self) -> Result<AppConfig, DomainError> {
        let path = self.config_path();

        if !path.exists() {
            info!(path = ?path, "No configuration yet, writing defaults");
            let config = AppConfig::new();
            self.save(&config)?;
            return Ok(config);
        }

        let config = Self::parse(&path, &fs::read_to_string(&path)?)?;
        info!(
            path = ?path,
            user_id = %config.session.user_id,
            speech_backend = ?config.speech.backend,
            "Configuration loaded"
        );
        Ok(config)
    }

    fn save(&self, config: &AppConfig) -> Result<(), DomainError> {
        config.validate()?;
        let path = self.config_path();

        let content = format!("{}{}", CONFIG_HEADER, toml::to_string_pretty(config)?);
        fs::write(&path, content)?;

        info!(path = ?path, "Configuration saved");
        Ok(())
    }

    fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    fn logs_dir(&self) -> PathBuf {
        self.dir.join("logs")
    }
}
