//! Backup job definition
//!
//! A job is the immutable description of one scheduling session: what to
//! back up, where to put the snapshots, how often, and how long to keep them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::JobConfig;
use crate::{BackplanError, Result};

/// Validated backup job. Construct with [`BackupJob::new`] or from a
/// [`JobConfig`]; invalid values never make it past construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupJob {
    source: PathBuf,
    destination: PathBuf,
    interval_minutes: u32,
    retention_days: u32,
}

impl BackupJob {
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        interval_minutes: u32,
        retention_days: u32,
    ) -> Result<Self> {
        let source = source.into();
        let destination = destination.into();

        if is_blank(&source) {
            return Err(BackplanError::Config("Source path must be set".to_string()));
        }
        if is_blank(&destination) {
            return Err(BackplanError::Config("Destination path must be set".to_string()));
        }
        if interval_minutes < 1 {
            return Err(BackplanError::Config(format!(
                "Interval must be at least 1 minute, got {}",
                interval_minutes
            )));
        }
        if retention_days < 1 {
            return Err(BackplanError::Config(format!(
                "Retention must be at least 1 day, got {}",
                retention_days
            )));
        }

        Ok(Self {
            source,
            destination,
            interval_minutes,
            retention_days,
        })
    }

    /// Directory whose files are backed up and restored into.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Root directory holding the `Backup_*` snapshot folders.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Scheduler period.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_minutes) * 60)
    }

    /// Age past which a snapshot is pruned.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

impl TryFrom<&JobConfig> for BackupJob {
    type Error = BackplanError;

    fn try_from(config: &JobConfig) -> Result<Self> {
        BackupJob::new(
            config.source_path.clone(),
            config.destination_path.clone(),
            config.interval_minutes,
            config.retention_days,
        )
    }
}

fn is_blank(path: &Path) -> bool {
    path.as_os_str().to_string_lossy().trim().is_empty()
}
