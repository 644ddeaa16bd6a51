use std::path::PathBuf;

use crate::domain::{AppConfig, DomainError};

/// Persistent home of the application configuration.
pub trait ConfigStore: Send + Sync {
    /// Load and validate the configuration, writing defaults on first run.
    fn load(&self) -> Result<AppConfig, DomainError>;

    /// Validate and persist the configuration.
    fn save(&self, config: &AppConfig) -> Result<(), DomainError>;

    fn config_path(&self) -> PathBuf;

    /// Directory for session log files.
    fn logs_dir(&self) -> PathBuf;
}
