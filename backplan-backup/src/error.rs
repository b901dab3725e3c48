use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] backplan_core::BackplanError),

    #[error("Destination {path} is unavailable: {source}")]
    Catalog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create snapshot folder {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Source directory {path} is unavailable: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot folder {0} disappeared during the run")]
    SnapshotLost(PathBuf),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Scheduler is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, BackupError>;
