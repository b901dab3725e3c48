//! Backplan
//!
//! Command-line shell around the snapshot backup engine: logging setup,
//! console and desktop rendering of engine notices.

pub mod logging;
pub mod notifications;
pub mod progress;

// Re-export commonly used types
pub use backplan_core::{BackplanError, BackupJob, Config, Notice, NotificationManager, SystemNotification};
pub use backplan_backup::{
    BackupEngine, BackupScheduler, CancellationToken, RestoreEngine, RunOutcome, Snapshot, SnapshotCatalog,
};
