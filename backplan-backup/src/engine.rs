//! One backup run
//!
//! A run prunes expired snapshots, finds the previous snapshot, stages a new
//! `Backup_*` folder and copies every source file the change detector flags.
//! Per-file failures are recorded and the run carries on; losing the
//! destination or the source aborts it. Cancellation is checked before each
//! file, never in the middle of one.

use backplan_core::{BackupJob, NotificationManager, SystemNotification};
use chrono::{DateTime, Local, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::catalog::SnapshotCatalog;
use crate::change_tracker::ChangeDetector;
use crate::error::{BackupError, Result};
use crate::naming::format_snapshot_name;

const COPY_BUFFER_SIZE: usize = 80 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Pruning,
    Planning,
    Staging,
    Copying,
    Completed,
    Canceled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Folder created by this run
    pub snapshot: Option<PathBuf>,
    /// Snapshot the change detector compared against
    pub previous: Option<PathBuf>,
    pub pruned: Vec<PathBuf>,
    /// Paths of the copies written into the snapshot
    pub copied: Vec<PathBuf>,
    pub skipped: usize,
    pub failures: Vec<FileFailure>,
    pub finished_at: Option<DateTime<Local>>,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunSummary),
    Canceled(RunSummary),
    Failed { cause: String, summary: RunSummary },
}

impl RunOutcome {
    pub fn state(&self) -> RunState {
        match self {
            RunOutcome::Completed(_) => RunState::Completed,
            RunOutcome::Canceled(_) => RunState::Canceled,
            RunOutcome::Failed { .. } => RunState::Failed,
        }
    }

    pub fn summary(&self) -> &RunSummary {
        match self {
            RunOutcome::Completed(summary)
            | RunOutcome::Canceled(summary)
            | RunOutcome::Failed { summary, .. } => summary,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }

    fn notification(&self) -> SystemNotification {
        match self {
            RunOutcome::Completed(summary) => SystemNotification::BackupCompleted {
                snapshot: summary.snapshot.clone().unwrap_or_default(),
                copied: summary.copied.len(),
                skipped: summary.skipped,
                failed: summary.failures.len(),
            },
            RunOutcome::Canceled(summary) => SystemNotification::BackupCanceled {
                snapshot: summary.snapshot.clone(),
                copied: summary.copied.len(),
            },
            RunOutcome::Failed { cause, .. } => SystemNotification::BackupFailed(cause.clone()),
        }
    }
}

enum Finish {
    Completed,
    Canceled,
}

pub struct BackupEngine {
    job: Arc<BackupJob>,
    catalog: SnapshotCatalog,
    detector: ChangeDetector,
    notifications: NotificationManager,
    /// Held for the whole of a run; at most one run per engine.
    gate: Mutex<()>,
    state: RwLock<RunState>,
    last_outcome: RwLock<Option<RunOutcome>>,
}

impl BackupEngine {
    pub fn new(job: BackupJob, notifications: NotificationManager) -> Self {
        let catalog = SnapshotCatalog::new(job.destination());
        Self {
            job: Arc::new(job),
            catalog,
            detector: ChangeDetector::new(),
            notifications,
            gate: Mutex::new(()),
            state: RwLock::new(RunState::Idle),
            last_outcome: RwLock::new(None),
        }
    }

    pub fn job(&self) -> &BackupJob {
        &self.job
    }

    /// The catalog this engine prunes. Share it with a restore engine so
    /// restores and pruning don't overlap.
    pub fn catalog(&self) -> &SnapshotCatalog {
        &self.catalog
    }

    pub fn notifications(&self) -> &NotificationManager {
        &self.notifications
    }

    pub async fn state(&self) -> RunState {
        *self.state.read().await
    }

    pub async fn last_outcome(&self) -> Option<RunOutcome> {
        self.last_outcome.read().await.clone()
    }

    /// Whether a run currently holds the engine.
    pub fn is_running(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// Runs a backup now, waiting for any active run to finish first.
    pub async fn run_once(&self, cancel: &CancellationToken) -> RunOutcome {
        let _gate = self.gate.lock().await;
        self.execute(cancel, Local::now()).await
    }

    /// Runs a backup unless one is already active, in which case `None`
    /// is returned and nothing happens.
    pub async fn try_run_once(&self, cancel: &CancellationToken) -> Option<RunOutcome> {
        let _gate = self.gate.try_lock().ok()?;
        if cancel.is_cancelled() {
            return None;
        }
        Some(self.execute(cancel, Local::now()).await)
    }

    /// Runs a backup as if the clock read `now`. The snapshot name and the
    /// pruning cutoff both derive from it.
    pub async fn run_once_at(&self, cancel: &CancellationToken, now: DateTime<Local>) -> RunOutcome {
        let _gate = self.gate.lock().await;
        self.execute(cancel, now).await
    }

    async fn execute(&self, cancel: &CancellationToken, now: DateTime<Local>) -> RunOutcome {
        let span = info_span!(
            "backup_run",
            snapshot = %format_snapshot_name(now.naive_local()),
            source = %self.job.source().display(),
            destination = %self.job.destination().display()
        );

        async move {
            info!("Backup run starting");
            self.notifications.publish(SystemNotification::BackupStarted);

            let mut summary = RunSummary::default();
            let result = self.perform(cancel, now, &mut summary).await;
            summary.finished_at = Some(Local::now());

            let outcome = match result {
                Ok(Finish::Completed) => {
                    info!(
                        copied = summary.copied.len(),
                        skipped = summary.skipped,
                        failed = summary.failures.len(),
                        "Backup completed at {}",
                        Local::now().format("%H:%M:%S")
                    );
                    RunOutcome::Completed(summary)
                }
                Ok(Finish::Canceled) => {
                    info!(copied = summary.copied.len(), "Backup canceled");
                    RunOutcome::Canceled(summary)
                }
                Err(e) => {
                    error!("Backup failed: {}", e);
                    RunOutcome::Failed {
                        cause: e.to_string(),
                        summary,
                    }
                }
            };

            self.set_state(outcome.state()).await;
            self.notifications.publish(outcome.notification());
            *self.last_outcome.write().await = Some(outcome.clone());
            outcome
        }
        .instrument(span)
        .await
    }

    async fn perform(
        &self,
        cancel: &CancellationToken,
        now: DateTime<Local>,
        summary: &mut RunSummary,
    ) -> Result<Finish> {
        if cancel.is_cancelled() {
            return Ok(Finish::Canceled);
        }

        self.set_state(RunState::Pruning).await;
        let report = self
            .catalog
            .prune(self.job.retention_days(), now.with_timezone(&Utc))
            .await?;
        for path in &report.removed {
            self.notifications
                .publish(SystemNotification::SnapshotPruned(path.clone()));
        }
        summary.pruned = report.removed;

        self.set_state(RunState::Planning).await;
        let previous = self.catalog.latest().await?.map(|s| s.path);
        match &previous {
            Some(path) => debug!("Comparing against previous snapshot {}", path.display()),
            None => debug!("No previous snapshot, copying everything"),
        }
        summary.previous = previous.clone();

        self.set_state(RunState::Staging).await;
        let snapshot = self
            .job
            .destination()
            .join(format_snapshot_name(now.naive_local()));
        fs::create_dir_all(&snapshot)
            .await
            .map_err(|source| BackupError::Staging {
                path: snapshot.clone(),
                source,
            })?;
        info!("Staged snapshot {}", snapshot.display());
        summary.snapshot = Some(snapshot.clone());

        self.set_state(RunState::Copying).await;
        let files = list_files(self.job.source())
            .await
            .map_err(|source| BackupError::SourceUnavailable {
                path: self.job.source().to_path_buf(),
                source,
            })?;

        for file in files {
            if cancel.is_cancelled() {
                return Ok(Finish::Canceled);
            }

            match self.detector.should_copy(&file, previous.as_deref()).await {
                Ok(true) => {}
                Ok(false) => {
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    self.record_failure(summary, &file, e.to_string());
                    continue;
                }
            }

            let Some(file_name) = file.file_name() else {
                continue;
            };
            let target = snapshot.join(file_name);

            match copy_file(&file, &target).await {
                Ok(bytes) => {
                    debug!("Copied {} ({} bytes)", file.display(), bytes);
                    self.notifications
                        .publish(SystemNotification::FileCopied(file.clone()));
                    summary.copied.push(target);
                }
                Err(e) => {
                    if fs::metadata(&snapshot).await.is_err() {
                        return Err(BackupError::SnapshotLost(snapshot));
                    }
                    self.record_failure(summary, &file, e.to_string());
                }
            }
        }

        Ok(Finish::Completed)
    }

    fn record_failure(&self, summary: &mut RunSummary, file: &Path, error: String) {
        warn!("Skipping {}: {}", file.display(), error);
        self.notifications.publish(SystemNotification::FileFailed {
            path: file.to_path_buf(),
            error: error.clone(),
        });
        summary.failures.push(FileFailure {
            path: file.to_path_buf(),
            error,
        });
    }

    async fn set_state(&self, state: RunState) {
        *self.state.write().await = state;
    }
}

/// Regular files directly under `dir`, sorted by name.
pub(crate) async fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => warn!("Cannot inspect {}: {}", path.display(), e),
        }
    }

    files.sort();
    Ok(files)
}

/// Streams the bytes of `src` into `dst`, replacing `dst` if it exists.
pub(crate) async fn copy_file(src: &Path, dst: &Path) -> io::Result<u64> {
    let reader = fs::File::open(src).await?;
    let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, reader);
    let mut writer = fs::File::create(dst).await?;
    let bytes = tokio::io::copy_buf(&mut reader, &mut writer).await?;
    writer.flush().await?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    struct TestEnv {
        source: TempDir,
        destination: TempDir,
    }

    impl TestEnv {
        fn new() -> Self {
            Self {
                source: TempDir::new().unwrap(),
                destination: TempDir::new().unwrap(),
            }
        }

        fn engine(&self, retention_days: u32) -> BackupEngine {
            let job = BackupJob::new(
                self.source.path(),
                self.destination.path(),
                60,
                retention_days,
            )
            .unwrap();
            BackupEngine::new(job, NotificationManager::default())
        }

        fn write(&self, name: &str, content: &str) {
            std::fs::write(self.source.path().join(name), content).unwrap();
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_first_run_copies_everything() {
        let env = TestEnv::new();
        env.write("a.txt", "alpha");
        env.write("b.txt", "beta");
        std::fs::create_dir(env.source.path().join("nested")).unwrap();
        std::fs::write(env.source.path().join("nested").join("deep.txt"), "x").unwrap();

        let engine = env.engine(7);
        let outcome = engine.run_once_at(&CancellationToken::new(), at(1, 10)).await;

        assert!(outcome.is_completed());
        let snapshot = env.destination.path().join("Backup_20240501_100000");
        assert_eq!(outcome.summary().snapshot.as_deref(), Some(snapshot.as_path()));
        assert_eq!(std::fs::read_to_string(snapshot.join("a.txt")).unwrap(), "alpha");
        assert_eq!(std::fs::read_to_string(snapshot.join("b.txt")).unwrap(), "beta");
        assert!(!snapshot.join("nested").exists());
        assert_eq!(engine.state().await, RunState::Completed);
    }

    #[tokio::test]
    async fn test_unchanged_files_skipped_on_second_run() {
        let env = TestEnv::new();
        env.write("a.txt", "alpha");
        let engine = env.engine(7);
        let cancel = CancellationToken::new();

        engine.run_once_at(&cancel, at(1, 10)).await;
        let second = engine.run_once_at(&cancel, at(1, 11)).await;

        assert!(second.is_completed());
        assert_eq!(second.summary().skipped, 1);
        assert!(second.summary().copied.is_empty());
        let second_snapshot = second.summary().snapshot.clone().unwrap();
        assert!(second_snapshot.exists());
        assert!(!second_snapshot.join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_canceled_before_start_creates_nothing() {
        let env = TestEnv::new();
        env.write("a.txt", "alpha");
        let engine = env.engine(7);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = engine.run_once_at(&cancel, at(1, 10)).await;
        assert_eq!(outcome.state(), RunState::Canceled);
        assert!(outcome.summary().snapshot.is_none());
        assert_eq!(std::fs::read_dir(env.destination.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_destination_fails_run() {
        let env = TestEnv::new();
        env.write("a.txt", "alpha");
        let job = BackupJob::new(
            env.source.path(),
            env.destination.path().join("unplugged"),
            60,
            7,
        )
        .unwrap();
        let engine = BackupEngine::new(job, NotificationManager::default());

        let outcome = engine.run_once(&CancellationToken::new()).await;
        assert!(matches!(outcome, RunOutcome::Failed { .. }));
        assert_eq!(engine.state().await, RunState::Failed);
        assert!(engine.last_outcome().await.is_some());
    }

    #[tokio::test]
    async fn test_missing_source_fails_after_staging() {
        let env = TestEnv::new();
        let job = BackupJob::new(
            env.source.path().join("gone"),
            env.destination.path(),
            60,
            7,
        )
        .unwrap();
        let engine = BackupEngine::new(job, NotificationManager::default());

        let outcome = engine.run_once_at(&CancellationToken::new(), at(2, 9)).await;
        match outcome {
            RunOutcome::Failed { cause, summary } => {
                assert!(cause.contains("Source directory"));
                assert!(summary.snapshot.is_some());
            }
            other => panic!("expected failure, got {:?}", other.state()),
        }
    }

    #[tokio::test]
    async fn test_try_run_once_skips_while_gate_held() {
        let env = TestEnv::new();
        let engine = env.engine(7);
        let cancel = CancellationToken::new();

        let guard = engine.gate.lock().await;
        assert!(engine.is_running());
        assert!(engine.try_run_once(&cancel).await.is_none());
        drop(guard);

        assert!(!engine.is_running());
        assert!(engine.try_run_once(&cancel).await.is_some());
    }

    #[tokio::test]
    async fn test_outcome_published_as_notice() {
        let env = TestEnv::new();
        env.write("a.txt", "alpha");
        let (notifications, mut rx) = NotificationManager::new();
        let job = BackupJob::new(env.source.path(), env.destination.path(), 60, 7).unwrap();
        let engine = BackupEngine::new(job, notifications);

        engine.run_once_at(&CancellationToken::new(), at(3, 8)).await;

        let mut seen = Vec::new();
        while let Ok(notice) = rx.try_recv() {
            seen.push(notice.notification);
        }
        assert_eq!(seen.first(), Some(&SystemNotification::BackupStarted));
        assert!(matches!(
            seen.last(),
            Some(SystemNotification::BackupCompleted { copied: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_prune_runs_before_staging() {
        let env = TestEnv::new();
        env.write("a.txt", "alpha");
        let engine = env.engine(1);
        let cancel = CancellationToken::new();

        let first = engine.run_once_at(&cancel, at(1, 10)).await;
        let old_snapshot = first.summary().snapshot.clone().unwrap();

        let later = at(1, 10) + Duration::days(3);
        let second = engine.run_once_at(&cancel, later).await;

        assert!(!old_snapshot.exists());
        assert_eq!(second.summary().pruned, vec![old_snapshot]);
        assert_eq!(second.summary().previous, None);
        assert_eq!(second.summary().copied.len(), 1);
    }

    #[tokio::test]
    async fn test_huge_retention_completes_without_pruning() {
        let env = TestEnv::new();
        env.write("a.txt", "alpha");
        let engine = env.engine(100_000_000);
        let cancel = CancellationToken::new();

        let first = engine.run_once_at(&cancel, at(1, 10)).await;
        assert!(first.is_completed());
        let old_snapshot = first.summary().snapshot.clone().unwrap();

        let second = engine
            .run_once_at(&cancel, at(1, 10) + Duration::days(3650))
            .await;
        assert!(second.is_completed());
        assert!(second.summary().pruned.is_empty());
        assert!(old_snapshot.exists());
    }
}
