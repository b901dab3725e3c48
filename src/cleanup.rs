use anyhow::Result;
use backplan::progress::{ErrorHandler, ProgressReporter};
use backplan_backup::{retention_cutoff, Snapshot, SnapshotCatalog};
use chrono::{DateTime, Utc};
use colored::*;
use std::path::Path;

/// Snapshots strictly older than `cutoff`, and how many are left.
fn split_expired(all: Vec<Snapshot>, cutoff: DateTime<Utc>) -> (Vec<Snapshot>, usize) {
    let (expired, kept): (Vec<_>, Vec<_>) =
        all.into_iter().partition(|snapshot| snapshot.timestamp < cutoff);
    (expired, kept.len())
}

/// Applies the retention window to `destination` without running a backup.
pub async fn perform_prune(destination: &Path, retention_days: u32, dry_run: bool) -> Result<()> {
    let progress = ProgressReporter::new();

    if dry_run {
        ErrorHandler::print_info("Prune Mode", "DRY RUN - No snapshots will be deleted");
    } else {
        ErrorHandler::print_info(
            "Prune Mode",
            &format!("Deleting snapshots older than {} day(s)", retention_days),
        );
    }
    println!();

    let catalog = SnapshotCatalog::new(destination);
    let now = Utc::now();
    let cutoff = retention_cutoff(retention_days, now);

    let list_spinner = progress.create_spinner("Scanning snapshots...");
    let (expired, kept) = split_expired(catalog.list().await?, cutoff);
    progress.finish_with_message(
        &list_spinner,
        &format!(
            "Found {} snapshot(s), {} expired",
            expired.len() + kept,
            expired.len()
        ),
    );

    if expired.is_empty() {
        println!();
        ErrorHandler::print_info("All Good", "No snapshots need to be deleted");
        return Ok(());
    }

    println!();
    println!("{}", "🗑️  Snapshots to Delete:".bright_yellow().bold());
    for snapshot in &expired {
        let age_days = (now - snapshot.timestamp).num_days();
        println!("   • {} - {} days old", snapshot.name.bright_red(), age_days);
    }
    println!("   Will keep: {} snapshot(s)", kept);

    if dry_run {
        println!();
        ErrorHandler::print_info("Dry Run Complete", "No snapshots were deleted");
        println!("   Run without --dry-run to actually delete these snapshots");
        return Ok(());
    }

    let report = catalog.prune(retention_days, now).await?;

    println!();
    if report.failed.is_empty() {
        ErrorHandler::print_success(
            "Prune Complete",
            &format!("Deleted {} snapshot(s)", report.removed.len()),
        );
    } else {
        ErrorHandler::print_warning(
            "Prune Partial",
            &format!(
                "Deleted {} snapshot(s), {} failed",
                report.removed.len(),
                report.failed.len()
            ),
        );
        for (path, error) in &report.failed {
            eprintln!("   {} {} - {}", "✗".bright_red(), path.display(), error);
        }
    }

    Ok(())
}
