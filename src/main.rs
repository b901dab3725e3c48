use anyhow::{anyhow, bail, Context, Result};
use backplan::logging;
use backplan::notifications::notify_outcome;
use backplan::progress::{print_notice, print_outcome, ErrorHandler, ProgressReporter};
use backplan_backup::{BackupEngine, BackupScheduler, CancellationToken, RestoreEngine, RunOutcome};
use backplan_core::{BackupJob, Config, Notice, NotificationManager, SystemNotification};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

mod cleanup;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up periodically until interrupted with Ctrl-C
    Run {
        #[command(flatten)]
        job: JobArgs,
        /// Show desktop notifications for run outcomes
        #[arg(long)]
        notify: bool,
    },
    /// Run a single backup now
    Once {
        #[command(flatten)]
        job: JobArgs,
    },
    /// List restorable snapshots, newest first
    List {
        #[command(flatten)]
        job: JobArgs,
        /// Show file count and size of each snapshot
        #[arg(short, long)]
        detailed: bool,
    },
    /// Restore a snapshot
    Restore {
        /// Snapshot folder name or path
        snapshot: String,
        /// Target directory (defaults to the job's source directory)
        #[arg(short, long)]
        target: Option<PathBuf>,
        #[command(flatten)]
        job: JobArgs,
    },
    /// Delete snapshots outside the retention window
    Prune {
        #[command(flatten)]
        job: JobArgs,
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Write a default configuration file
    Config {
        /// Where to write it (defaults to the platform config directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Job values that take precedence over the config file.
#[derive(Args, Debug, Default, Clone)]
struct JobArgs {
    /// Directory to back up
    #[arg(long)]
    source: Option<PathBuf>,
    /// Directory that holds the snapshot folders
    #[arg(long)]
    destination: Option<PathBuf>,
    /// Minutes between runs
    #[arg(long)]
    interval: Option<u32>,
    /// Days a snapshot is kept
    #[arg(long)]
    retention: Option<u32>,
}

impl JobArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(source) = &self.source {
            config.job.source_path = source.clone();
        }
        if let Some(destination) = &self.destination {
            config.job.destination_path = destination.clone();
        }
        if let Some(interval) = self.interval {
            config.job.interval_minutes = interval;
        }
        if let Some(retention) = self.retention {
            config.job.retention_days = retention;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Commands::Config { output, force } = &cli.command {
        write_default_config(output.clone(), *force)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = Config::load_or_default(cli.config.clone())
        .context("Failed to load configuration")?;
    if let Some(job) = cli.command.job_args() {
        job.apply(&mut config);
    }

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let log_dir = config.log_dir();

    // Keep the guard alive for the duration of the program
    let _log_guard = match logging::init_logging(log_dir.clone(), &level) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: Failed to initialize file logging: {}", e);
            eprintln!("Continuing with console-only logging...");
            logging::init_console_logging(&level);
            None
        }
    };
    info!("Backplan starting up, logs in {}", log_dir.display());

    // the log guard has to drop before the process exits
    match handle_command(cli.command, config).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            ErrorHandler::print_detailed_error(&e);
            Ok(ExitCode::FAILURE)
        }
    }
}

impl Commands {
    fn job_args(&self) -> Option<&JobArgs> {
        match self {
            Commands::Run { job, .. }
            | Commands::Once { job }
            | Commands::List { job, .. }
            | Commands::Restore { job, .. }
            | Commands::Prune { job, .. } => Some(job),
            Commands::Config { .. } => None,
        }
    }
}

async fn handle_command(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Run { notify, .. } => run_scheduler(config.backup_job()?, notify).await,
        Commands::Once { .. } => run_single(config.backup_job()?).await,
        Commands::List { detailed, .. } => list_snapshots(&destination_root(&config)?, detailed).await,
        Commands::Restore {
            snapshot, target, ..
        } => {
            let target = match target {
                Some(target) => target,
                None if !config.job.source_path.as_os_str().is_empty() => {
                    config.job.source_path.clone()
                }
                None => bail!("No restore target: pass --target or configure a source path"),
            };
            restore_snapshot(&destination_root(&config)?, &snapshot, &target).await
        }
        Commands::Prune { dry_run, .. } => {
            if config.job.retention_days < 1 {
                bail!("Retention must be at least one day");
            }
            cleanup::perform_prune(&destination_root(&config)?, config.job.retention_days, dry_run)
                .await
        }
        Commands::Config { output, force } => write_default_config(output, force),
    }
}

/// Listing, restore and prune only need the destination root.
fn destination_root(config: &Config) -> Result<PathBuf> {
    let destination = &config.job.destination_path;
    if destination.to_string_lossy().trim().is_empty() {
        bail!("No destination configured: pass --destination or set job.destination_path");
    }
    Ok(destination.clone())
}

async fn render_notices(mut rx: broadcast::Receiver<Notice>, desktop: bool) {
    loop {
        match rx.recv().await {
            Ok(notice) => {
                print_notice(&notice);
                if desktop && notice.notification.is_run_outcome() {
                    let notification = notice.notification.clone();
                    let shown = tokio::task::spawn_blocking(move || notify_outcome(&notification)).await;
                    match shown {
                        Ok(Err(e)) => warn!("Desktop notification failed: {}", e),
                        Err(e) => warn!("Desktop notification task failed: {}", e),
                        Ok(Ok(())) => {}
                    }
                }
            }
            Err(RecvError::Lagged(missed)) => warn!("Console fell behind, {} notice(s) dropped", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn run_scheduler(job: BackupJob, desktop: bool) -> Result<()> {
    let (notifications, rx) = NotificationManager::new();
    let engine = Arc::new(BackupEngine::new(job, notifications));
    let printer = tokio::spawn(render_notices(rx, desktop));

    let mut scheduler = BackupScheduler::new(engine.clone());
    scheduler.start()?;
    ErrorHandler::print_info(
        "Scheduler Started",
        &format!(
            "Backing up {} into {} every {} minute(s), keeping {} day(s). Press Ctrl-C to stop.",
            engine.job().source().display(),
            engine.job().destination().display(),
            engine.job().interval_minutes(),
            engine.job().retention_days()
        ),
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    println!();
    info!("Shutdown requested");
    scheduler.stop();

    // Cancellation lands between files; wait for the active run to unwind
    while engine.is_running() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    // let the printer drain the final outcome notice
    tokio::time::sleep(Duration::from_millis(100)).await;
    printer.abort();

    match engine.last_outcome().await {
        Some(outcome) => println!(
            "{} last run {:?}",
            "Scheduler stopped,".bright_blue().bold(),
            outcome.state()
        ),
        None => println!("{}", "Scheduler stopped before any run".bright_blue().bold()),
    }
    Ok(())
}

async fn run_single(job: BackupJob) -> Result<()> {
    let (notifications, mut rx) = NotificationManager::new();
    let engine = BackupEngine::new(job, notifications);
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let progress = ProgressReporter::new();
    let spinner = progress.create_spinner("Starting backup...");
    let status = spinner.clone();
    let watcher = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notice) => match &notice.notification {
                    SystemNotification::FileCopied(path) => {
                        status.set_message(format!("Copied {}", path.display()))
                    }
                    SystemNotification::SnapshotPruned(_) | SystemNotification::FileFailed { .. } => {
                        status.suspend(|| print_notice(&notice))
                    }
                    _ => {}
                },
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let outcome = engine.run_once(&cancel).await;
    watcher.abort();
    progress.finish_with_message(&spinner, &format!("Run finished: {:?}", outcome.state()));

    print_outcome(&outcome);
    match outcome {
        RunOutcome::Failed { cause, .. } => Err(anyhow!(cause)),
        _ => Ok(()),
    }
}

async fn list_snapshots(destination: &Path, detailed: bool) -> Result<()> {
    let restore = RestoreEngine::for_destination(destination);
    let snapshots = restore.list_restorable().await?;

    if snapshots.is_empty() {
        ErrorHandler::print_info(
            "No Snapshots",
            &format!("No snapshots found in {}", destination.display()),
        );
        return Ok(());
    }

    println!(
        "{} {}",
        "📦 Snapshots in".bright_blue().bold(),
        destination.display()
    );
    let now = Utc::now();
    for snapshot in &snapshots {
        if detailed {
            let (files, bytes) = snapshot_usage(&snapshot.path).await?;
            println!(
                "   • {}  {} file(s), {}, {} day(s) old",
                snapshot.name.bright_green(),
                files,
                ErrorHandler::format_file_size(bytes),
                (now - snapshot.timestamp).num_days()
            );
        } else {
            println!("   • {}", snapshot.name.bright_green());
        }
    }
    println!("   Total: {} snapshot(s)", snapshots.len());
    Ok(())
}

async fn snapshot_usage(path: &Path) -> Result<(usize, u64)> {
    let mut entries = tokio::fs::read_dir(path).await?;
    let (mut files, mut bytes) = (0, 0);
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            files += 1;
            bytes += metadata.len();
        }
    }
    Ok((files, bytes))
}

async fn restore_snapshot(destination: &Path, snapshot: &str, target: &Path) -> Result<()> {
    let restore = RestoreEngine::for_destination(destination);
    let snapshot = restore.resolve(snapshot).await?;

    let progress = ProgressReporter::new();
    let spinner = progress.create_spinner(&format!(
        "Restoring {} into {}...",
        snapshot.name,
        target.display()
    ));
    let report = restore.restore(&snapshot.path, target).await;
    progress.finish_with_message(&spinner, "Restore finished");
    let report = report?;

    if report.failures.is_empty() {
        ErrorHandler::print_success(
            "Restore Complete",
            &format!(
                "{} file(s) restored from {} into {}",
                report.restored.len(),
                snapshot.name,
                target.display()
            ),
        );
    } else {
        ErrorHandler::print_warning(
            "Restore Partial",
            &format!(
                "{} file(s) restored, {} failed",
                report.restored.len(),
                report.failures.len()
            ),
        );
        for failure in &report.failures {
            eprintln!("   {} {}: {}", "✗".red(), failure.path.display(), failure.error);
        }
    }
    Ok(())
}

fn write_default_config(output: Option<PathBuf>, force: bool) -> Result<()> {
    let path = output.unwrap_or_else(Config::default_path);
    if path.exists() && !force {
        bail!("{} already exists, pass --force to overwrite", path.display());
    }

    let body = Config::default().to_toml_string()?;
    let contents = format!(
        "# Backplan configuration\n\
         # source_path and destination_path must be set before running backups.\n\
         # interval_minutes and retention_days must both be at least 1.\n\n{}",
        body
    );

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&path, contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    ErrorHandler::print_success(
        "Configuration Written",
        &format!("Default configuration saved to {}", path.display()),
    );
    Ok(())
}
