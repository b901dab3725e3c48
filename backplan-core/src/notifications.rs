use chrono::{DateTime, Local};
use std::fmt;
use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::{BackplanError, Result};

const CHANNEL_CAPACITY: usize = 256;

/// Events published by the engine for the shell to render.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemNotification {
    BackupStarted,
    SnapshotPruned(PathBuf),
    FileCopied(PathBuf),
    FileFailed { path: PathBuf, error: String },
    BackupCompleted {
        snapshot: PathBuf,
        copied: usize,
        skipped: usize,
        failed: usize,
    },
    BackupCanceled {
        snapshot: Option<PathBuf>,
        copied: usize,
    },
    BackupFailed(String),
    RestoreCompleted {
        snapshot: PathBuf,
        restored: usize,
        failed: usize,
    },
}

impl SystemNotification {
    /// Whether this notice ends a backup run.
    pub fn is_run_outcome(&self) -> bool {
        matches!(
            self,
            SystemNotification::BackupCompleted { .. }
                | SystemNotification::BackupCanceled { .. }
                | SystemNotification::BackupFailed(_)
        )
    }
}

impl fmt::Display for SystemNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemNotification::BackupStarted => write!(f, "Backup started"),
            SystemNotification::SnapshotPruned(path) => {
                write!(f, "Pruned expired snapshot {}", path.display())
            }
            SystemNotification::FileCopied(path) => write!(f, "Copied {}", path.display()),
            SystemNotification::FileFailed { path, error } => {
                write!(f, "Failed to copy {}: {}", path.display(), error)
            }
            SystemNotification::BackupCompleted {
                snapshot,
                copied,
                skipped,
                failed,
            } => write!(
                f,
                "Backup completed into {} ({} copied, {} unchanged, {} failed)",
                snapshot.display(),
                copied,
                skipped,
                failed
            ),
            SystemNotification::BackupCanceled { snapshot, copied } => match snapshot {
                Some(snapshot) => write!(
                    f,
                    "Backup canceled after {} file(s); {} left partially populated",
                    copied,
                    snapshot.display()
                ),
                None => write!(f, "Backup canceled before any snapshot was created"),
            },
            SystemNotification::BackupFailed(cause) => write!(f, "Backup failed: {}", cause),
            SystemNotification::RestoreCompleted {
                snapshot,
                restored,
                failed,
            } => write!(
                f,
                "Restored {} file(s) from {} ({} failed)",
                restored,
                snapshot.display(),
                failed
            ),
        }
    }
}

/// A notification stamped with the local time it was raised.
#[derive(Debug, Clone)]
pub struct Notice {
    pub timestamp: DateTime<Local>,
    pub notification: SystemNotification,
}

impl Notice {
    pub fn new(notification: SystemNotification) -> Self {
        Self {
            timestamp: Local::now(),
            notification,
        }
    }

    pub fn message(&self) -> String {
        format!("[{}] {}", self.timestamp.format("%H:%M:%S"), self.notification)
    }
}

#[derive(Clone)]
pub struct NotificationManager {
    tx: broadcast::Sender<Notice>,
}

impl NotificationManager {
    pub fn new() -> (Self, broadcast::Receiver<Notice>) {
        let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    /// Sends a notice. Fails only when nobody is listening.
    pub fn notify(&self, notification: SystemNotification) -> Result<()> {
        self.tx
            .send(Notice::new(notification))
            .map_err(|e| BackplanError::Notification(format!("Failed to send notification: {}", e)))?;
        Ok(())
    }

    /// Sends a notice, logging instead of failing when there are no receivers.
    pub fn publish(&self, notification: SystemNotification) {
        if let Err(e) = self.notify(notification) {
            tracing::debug!("{}", e);
        }
    }
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new().0
    }
}

impl fmt::Debug for NotificationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationManager")
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}
