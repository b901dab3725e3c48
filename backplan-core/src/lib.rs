use thiserror::Error;

pub mod config;
pub mod job;
pub mod notifications;

pub use config::{Config, JobConfig, LoggingConfig};
pub use job::BackupJob;
pub use notifications::{Notice, NotificationManager, SystemNotification};

#[derive(Debug, Error)]
pub enum BackplanError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Notification error: {0}")]
    Notification(String),
    #[error("General error: {0}")]
    Other(String),
}

impl From<toml::de::Error> for BackplanError {
    fn from(err: toml::de::Error) -> Self {
        BackplanError::Config(format!("Failed to parse config: {}", err))
    }
}

impl From<toml::ser::Error> for BackplanError {
    fn from(err: toml::ser::Error) -> Self {
        BackplanError::Config(format!("Failed to serialize config: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, BackplanError>;
