//! Snapshot backup engine
//!
//! Periodic, incremental backups of a flat source directory into
//! `Backup_yyyyMMdd_HHmmss` folders, retention pruning, and restore.

pub mod error;
pub mod naming;
pub mod catalog;
pub mod change_tracker;
pub mod engine;
pub mod scheduler;
pub mod restore;

pub use error::{BackupError, Result};
pub use naming::{format_snapshot_name, parse_snapshot_name, SNAPSHOT_PREFIX, SNAPSHOT_TIME_FORMAT};
pub use catalog::{retention_cutoff, PruneReport, Snapshot, SnapshotCatalog};
pub use change_tracker::ChangeDetector;
pub use engine::{BackupEngine, FileFailure, RunOutcome, RunState, RunSummary};
pub use scheduler::{BackupScheduler, SchedulerState};
pub use restore::{RestoreEngine, RestoreReport};

pub use tokio_util::sync::CancellationToken;
