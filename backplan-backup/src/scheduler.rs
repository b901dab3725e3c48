//! Periodic backup scheduling
//!
//! The scheduler fires a run immediately on `start`, then once per job
//! interval. A tick that lands while a run is still active is skipped, not
//! queued.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::BackupEngine;
use crate::error::{BackupError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Created,
    Started,
    Stopped,
}

pub struct BackupScheduler {
    engine: Arc<BackupEngine>,
    period: Duration,
    state: SchedulerState,
    cancel: CancellationToken,
    ticker: Option<JoinHandle<()>>,
}

impl BackupScheduler {
    pub fn new(engine: Arc<BackupEngine>) -> Self {
        let period = engine.job().interval();
        Self::with_period(engine, period)
    }

    /// Scheduler with an explicit period instead of the job interval.
    pub fn with_period(engine: Arc<BackupEngine>, period: Duration) -> Self {
        Self {
            engine,
            period,
            state: SchedulerState::Created,
            cancel: CancellationToken::new(),
            ticker: None,
        }
    }

    pub fn engine(&self) -> &Arc<BackupEngine> {
        &self.engine
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SchedulerState::Started
    }

    /// Starts ticking on the current tokio runtime. Must be stopped before
    /// it can be started again.
    pub fn start(&mut self) -> Result<()> {
        if self.state == SchedulerState::Started {
            return Err(BackupError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        self.cancel = cancel.clone();
        let engine = self.engine.clone();
        let period = self.period;

        self.ticker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let engine = engine.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    match engine.try_run_once(&cancel).await {
                        Some(outcome) => debug!("Scheduled run finished: {:?}", outcome.state()),
                        None => debug!("Previous backup run still active or stopping, tick skipped"),
                    }
                });
            }

            debug!("Scheduler ticker exited");
        }));

        self.state = SchedulerState::Started;
        info!(
            "Backup scheduler started: every {} minute(s), retention {} day(s)",
            self.period.as_secs() / 60,
            self.engine.job().retention_days()
        );
        Ok(())
    }

    /// Cancels any in-flight run and stops the ticker. Does not wait for
    /// the run to unwind; no new run starts once this returns.
    pub fn stop(&mut self) {
        if self.state != SchedulerState::Started {
            return;
        }

        self.cancel.cancel();
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.state = SchedulerState::Stopped;
        info!("Backup scheduler stopped");
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backplan_core::{BackupJob, Notice, NotificationManager, SystemNotification};
    use tempfile::TempDir;
    use tokio::sync::broadcast::{self, error::TryRecvError};
    use tokio::time::timeout;

    fn engine(
        source: &TempDir,
        destination: &TempDir,
    ) -> (Arc<BackupEngine>, broadcast::Receiver<Notice>) {
        let job = BackupJob::new(source.path(), destination.path(), 1, 7).unwrap();
        let (notifications, rx) = NotificationManager::new();
        (Arc::new(BackupEngine::new(job, notifications)), rx)
    }

    async fn next_outcome(rx: &mut broadcast::Receiver<Notice>) -> SystemNotification {
        loop {
            let notice = rx.recv().await.unwrap();
            if notice.notification.is_run_outcome() {
                return notice.notification;
            }
        }
    }

    #[test]
    fn test_period_defaults_to_job_interval() {
        let source = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();
        let (engine, _rx) = engine(&source, &destination);
        let scheduler = BackupScheduler::new(engine);
        assert_eq!(scheduler.period(), Duration::from_secs(60));
        assert_eq!(scheduler.state(), SchedulerState::Created);
    }

    #[tokio::test]
    async fn test_start_fires_immediately() {
        let source = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();
        std::fs::write(source.path().join("a.txt"), "alpha").unwrap();
        let (engine, mut rx) = engine(&source, &destination);

        let mut scheduler = BackupScheduler::new(engine);
        scheduler.start().unwrap();
        assert!(scheduler.is_running());

        let outcome = timeout(Duration::from_secs(10), next_outcome(&mut rx))
            .await
            .expect("first run should fire right away");
        assert!(matches!(outcome, SystemNotification::BackupCompleted { copied: 1, .. }));

        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_double_start_rejected_and_restart_allowed() {
        let source = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();
        let (engine, _rx) = engine(&source, &destination);

        let mut scheduler = BackupScheduler::with_period(engine, Duration::from_secs(3600));
        scheduler.start().unwrap();
        assert!(matches!(scheduler.start(), Err(BackupError::AlreadyRunning)));

        scheduler.stop();
        scheduler.stop();
        assert!(scheduler.start().is_ok());
        assert!(scheduler.is_running());
    }

    #[tokio::test]
    async fn test_no_runs_after_stop() {
        let source = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();
        std::fs::write(source.path().join("a.txt"), "alpha").unwrap();
        let (engine, mut rx) = engine(&source, &destination);

        let mut scheduler = BackupScheduler::with_period(engine.clone(), Duration::from_millis(50));
        scheduler.start().unwrap();
        timeout(Duration::from_secs(10), next_outcome(&mut rx))
            .await
            .unwrap();
        scheduler.stop();

        // let anything already in flight unwind
        while engine.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        loop {
            match rx.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut started = 0;
        while let Ok(notice) = rx.try_recv() {
            if notice.notification == SystemNotification::BackupStarted {
                started += 1;
            }
        }
        assert_eq!(started, 0);
    }

    #[tokio::test]
    async fn test_failed_run_retried_on_next_tick() {
        let source = TempDir::new().unwrap();
        let parent = TempDir::new().unwrap();
        let destination = parent.path().join("usb-drive");
        std::fs::write(source.path().join("a.txt"), "alpha").unwrap();

        let job = BackupJob::new(source.path(), &destination, 1, 7).unwrap();
        let (notifications, mut rx) = NotificationManager::new();
        let engine = Arc::new(BackupEngine::new(job, notifications));
        let mut scheduler = BackupScheduler::with_period(engine, Duration::from_millis(50));
        scheduler.start().unwrap();

        for _ in 0..2 {
            let outcome = timeout(Duration::from_secs(10), next_outcome(&mut rx))
                .await
                .unwrap();
            assert!(matches!(outcome, SystemNotification::BackupFailed(_)));
        }
        assert!(scheduler.is_running());

        std::fs::create_dir(&destination).unwrap();
        let recovered = timeout(Duration::from_secs(10), async {
            loop {
                if let SystemNotification::BackupCompleted { copied, .. } =
                    next_outcome(&mut rx).await
                {
                    return copied;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(recovered, 1);

        scheduler.stop();
    }
}
