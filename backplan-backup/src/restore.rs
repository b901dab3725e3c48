use backplan_core::{NotificationManager, SystemNotification};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::catalog::{Snapshot, SnapshotCatalog};
use crate::engine::{copy_file, list_files, FileFailure};
use crate::error::{BackupError, Result};

#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub snapshot: PathBuf,
    pub target: PathBuf,
    /// Paths written in the target directory
    pub restored: Vec<PathBuf>,
    pub failures: Vec<FileFailure>,
}

/// Copies a snapshot's files back into a directory. Every file in the
/// snapshot overwrites its namesake; nothing else in the target is touched.
/// Restores are best-effort: a file that fails is reported and the rest
/// still go through.
pub struct RestoreEngine {
    catalog: SnapshotCatalog,
    notifications: NotificationManager,
}

impl RestoreEngine {
    pub fn new(catalog: SnapshotCatalog, notifications: NotificationManager) -> Self {
        Self {
            catalog,
            notifications,
        }
    }

    pub fn for_destination(root: impl Into<PathBuf>) -> Self {
        Self::new(SnapshotCatalog::new(root), NotificationManager::default())
    }

    /// Snapshots available for restore, newest first.
    pub async fn list_restorable(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = self.catalog.list().await?;
        snapshots.reverse();
        Ok(snapshots)
    }

    /// Finds a snapshot by folder name or by path.
    pub async fn resolve(&self, name_or_path: &str) -> Result<Snapshot> {
        let wanted = Path::new(name_or_path)
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| BackupError::SnapshotNotFound(name_or_path.to_string()))?;

        self.catalog
            .list()
            .await?
            .into_iter()
            .find(|snapshot| snapshot.name == wanted)
            .ok_or_else(|| BackupError::SnapshotNotFound(name_or_path.to_string()))
    }

    pub async fn restore(&self, snapshot: &Path, target: &Path) -> Result<RestoreReport> {
        let _read = self.catalog.read_lock().await;

        let files = list_files(snapshot).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BackupError::SnapshotNotFound(snapshot.display().to_string())
            } else {
                BackupError::Io(e)
            }
        })?;
        fs::create_dir_all(target).await?;

        let mut report = RestoreReport {
            snapshot: snapshot.to_path_buf(),
            target: target.to_path_buf(),
            ..RestoreReport::default()
        };

        for file in files {
            let Some(file_name) = file.file_name() else {
                continue;
            };
            let destination = target.join(file_name);

            match copy_file(&file, &destination).await {
                Ok(_) => report.restored.push(destination),
                Err(e) => {
                    warn!("Failed to restore {}: {}", file.display(), e);
                    report.failures.push(FileFailure {
                        path: file,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Restored {} file(s) from {} into {} ({} failed)",
            report.restored.len(),
            snapshot.display(),
            target.display(),
            report.failures.len()
        );
        self.notifications.publish(SystemNotification::RestoreCompleted {
            snapshot: snapshot.to_path_buf(),
            restored: report.restored.len(),
            failed: report.failures.len(),
        });

        Ok(report)
    }
}
