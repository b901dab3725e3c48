//! Snapshot discovery under a destination root
//!
//! The catalog is never cached: every query lists the destination directory
//! again, so answers always reflect the filesystem at the moment of listing.

use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::error::{BackupError, Result};
use crate::naming::{parse_snapshot_name, SNAPSHOT_PREFIX};

/// One snapshot folder found under the destination root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub path: PathBuf,
    pub name: String,
    /// Folder timestamp, read as UTC
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a pruning pass.
#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    pub cutoff: Option<DateTime<Utc>>,
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Oldest timestamp a snapshot may carry and still be kept. A window
/// reaching past the start of the calendar keeps everything.
pub fn retention_cutoff(retention_days: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(retention_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Clone)]
pub struct SnapshotCatalog {
    root: PathBuf,
    /// Restores hold the read half, pruning holds the write half.
    guard: Arc<RwLock<()>>,
}

impl SnapshotCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            guard: Arc::new(RwLock::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All snapshots, oldest first. Folders whose names don't parse are
    /// ignored.
    pub async fn list(&self) -> Result<Vec<Snapshot>> {
        let catalog_err = |source| BackupError::Catalog {
            path: self.root.clone(),
            source,
        };

        let mut entries = fs::read_dir(&self.root).await.map_err(catalog_err)?;
        let mut snapshots = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(catalog_err)? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !name.starts_with(SNAPSHOT_PREFIX) {
                continue;
            }

            match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!("Cannot inspect {}: {}", entry.path().display(), e);
                    continue;
                }
            }

            match parse_snapshot_name(&name) {
                Some(timestamp) => snapshots.push(Snapshot {
                    path: entry.path(),
                    name,
                    timestamp,
                }),
                None => debug!("Ignoring folder with unparseable name: {}", name),
            }
        }

        snapshots.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.name.cmp(&b.name)));
        Ok(snapshots)
    }

    /// The snapshot with the greatest timestamp, if any.
    pub async fn latest(&self) -> Result<Option<Snapshot>> {
        Ok(self.list().await?.pop())
    }

    /// Snapshots strictly older than `cutoff`.
    pub async fn older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Snapshot>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| s.timestamp < cutoff)
            .collect())
    }

    /// Deletes every snapshot older than `now - retention_days`. A folder
    /// that cannot be removed is logged and skipped.
    pub async fn prune(&self, retention_days: u32, now: DateTime<Utc>) -> Result<PruneReport> {
        let cutoff = retention_cutoff(retention_days, now);
        let _write = self.guard.write().await;

        let expired = self.older_than(cutoff).await?;
        let mut report = PruneReport {
            cutoff: Some(cutoff),
            ..PruneReport::default()
        };

        for snapshot in expired {
            match fs::remove_dir_all(&snapshot.path).await {
                Ok(()) => {
                    info!("Pruned snapshot {} (older than {})", snapshot.name, cutoff);
                    report.removed.push(snapshot.path);
                }
                Err(e) => {
                    warn!("Failed to prune snapshot {}: {}", snapshot.path.display(), e);
                    report.failed.push((snapshot.path, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Shared access that keeps pruning out while a snapshot is being read.
    pub async fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.guard.read().await
    }
}
