use backplan_backup::RunOutcome;
use backplan_core::{Notice, SystemNotification};
use colored::*;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

pub struct ProgressReporter {
    multi: MultiProgress,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
        }
    }

    pub fn create_spinner(&self, message: &str) -> ProgressBar {
        let spinner = self.multi.add(ProgressBar::new_spinner());
        // the template is a literal, a parse failure leaves the default style
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.blue} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }

    pub fn finish_with_message(&self, pb: &ProgressBar, message: &str) {
        pb.finish_with_message(message.to_string());
    }
}

pub struct ErrorHandler;

impl ErrorHandler {
    pub fn print_error(title: &str, error: &str) {
        eprintln!("{} {}", "❌".red(), title.red().bold());
        eprintln!("   {}", error);
    }

    pub fn print_warning(title: &str, warning: &str) {
        eprintln!("{} {}", "⚠️".yellow(), title.yellow().bold());
        eprintln!("   {}", warning);
    }

    pub fn print_success(title: &str, message: &str) {
        println!("{} {}", "✅".green(), title.green().bold());
        println!("   {}", message);
    }

    pub fn print_info(title: &str, message: &str) {
        println!("{} {}", "ℹ️".blue(), title.blue().bold());
        println!("   {}", message);
    }

    pub fn print_detailed_error(error: &anyhow::Error) {
        eprintln!("{} {}", "❌".red(), "Error Details:".red().bold());

        for (level, cause) in error.chain().enumerate() {
            let indent = "   ".repeat(level + 1);
            if level == 0 {
                eprintln!("{}• {}", indent, cause);
            } else {
                eprintln!("{}└─ Caused by: {}", indent, cause);
            }
        }
    }

    pub fn format_file_size(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// One console line per notice, prefixed with the local time it was raised.
pub fn notice_line(notice: &Notice) -> String {
    let time = notice.timestamp.format("%H:%M:%S").to_string().dimmed();
    let body = match &notice.notification {
        SystemNotification::BackupStarted => "Backup started".bright_blue().to_string(),
        SystemNotification::SnapshotPruned(path) => {
            format!("{} {}", "Pruned".yellow(), file_label(path))
        }
        SystemNotification::FileCopied(path) => format!("  {} {}", "+".green(), file_label(path)),
        SystemNotification::FileFailed { path, error } => {
            format!("  {} {}: {}", "✗".red(), file_label(path), error)
        }
        SystemNotification::BackupCompleted {
            snapshot,
            copied,
            skipped,
            failed,
        } => format!(
            "{} {} ({} copied, {} unchanged, {} failed)",
            "Backup completed".green().bold(),
            file_label(snapshot),
            copied,
            skipped,
            failed
        ),
        SystemNotification::BackupCanceled { snapshot, copied } => format!(
            "{} {} after {} file(s)",
            "Backup canceled".yellow().bold(),
            snapshot
                .as_deref()
                .map(file_label)
                .unwrap_or_else(|| "before staging".to_string()),
            copied
        ),
        SystemNotification::BackupFailed(cause) => {
            format!("{} {}", "Backup failed:".red().bold(), cause)
        }
        SystemNotification::RestoreCompleted {
            snapshot,
            restored,
            failed,
        } => format!(
            "{} {} ({} restored, {} failed)",
            "Restore completed".green().bold(),
            file_label(snapshot),
            restored,
            failed
        ),
    };
    format!("[{}] {}", time, body)
}

pub fn print_notice(notice: &Notice) {
    match notice.notification {
        SystemNotification::FileFailed { .. } | SystemNotification::BackupFailed(_) => {
            eprintln!("{}", notice_line(notice))
        }
        _ => println!("{}", notice_line(notice)),
    }
}

/// Final report for a single run.
pub fn print_outcome(outcome: &RunOutcome) {
    let summary = outcome.summary();
    let snapshot = summary
        .snapshot
        .as_deref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "(none)".to_string());

    match outcome {
        RunOutcome::Completed(_) => ErrorHandler::print_success(
            "Backup Complete",
            &format!(
                "{} file(s) copied, {} unchanged, {} failed into {}",
                summary.copied.len(),
                summary.skipped,
                summary.failures.len(),
                snapshot
            ),
        ),
        RunOutcome::Canceled(_) => ErrorHandler::print_warning(
            "Backup Canceled",
            &format!("{} file(s) copied into {} before stopping", summary.copied.len(), snapshot),
        ),
        RunOutcome::Failed { cause, .. } => ErrorHandler::print_error("Backup Failed", cause),
    }

    if !summary.pruned.is_empty() {
        println!("   Pruned {} expired snapshot(s)", summary.pruned.len());
    }
    for failure in &summary.failures {
        eprintln!("   {} {}: {}", "✗".red(), failure.path.display(), failure.error);
    }
}
