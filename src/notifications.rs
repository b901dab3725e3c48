//! Desktop notifications for run outcomes.

use anyhow::Result;
use backplan_core::SystemNotification;

#[cfg(target_os = "linux")]
use notify_rust::{Notification, Timeout, Urgency};

/// Send a desktop notification about backup status
pub fn send_notification(title: &str, body: &str, success: bool) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        let urgency = if success {
            Urgency::Normal
        } else {
            Urgency::Critical
        };

        let timeout = if success {
            Timeout::Milliseconds(5000)
        } else {
            Timeout::Milliseconds(10000)
        };

        Notification::new()
            .summary(title)
            .body(body)
            .icon(if success { "emblem-default" } else { "dialog-error" })
            .appname("Backplan")
            .urgency(urgency)
            .timeout(timeout)
            .show()?;
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = success;
        println!("📢 {} - {}", title, body);
    }

    Ok(())
}

/// Title, body and success flag for notices worth a desktop popup.
/// Per-file and start notices are left to the console.
pub fn desktop_message(notification: &SystemNotification) -> Option<(String, String, bool)> {
    match notification {
        SystemNotification::BackupCompleted {
            copied, failed, ..
        } => Some((
            "Backplan Backup Complete".to_string(),
            format!("✅ Copied {} file(s), {} failed", copied, failed),
            *failed == 0,
        )),
        SystemNotification::BackupCanceled { copied, .. } => Some((
            "Backplan Backup Canceled".to_string(),
            format!("Stopped after {} file(s)", copied),
            true,
        )),
        SystemNotification::BackupFailed(cause) => Some((
            "Backplan Backup Failed".to_string(),
            format!("❌ Backup failed: {}", cause),
            false,
        )),
        SystemNotification::RestoreCompleted {
            restored, failed, ..
        } => Some((
            "Backplan Restore Complete".to_string(),
            format!("✅ Restored {} file(s), {} failed", restored, failed),
            *failed == 0,
        )),
        _ => None,
    }
}

/// Shows a popup for `notification` if it is an outcome.
pub fn notify_outcome(notification: &SystemNotification) -> Result<()> {
    match desktop_message(notification) {
        Some((title, body, success)) => send_notification(&title, &body, success),
        None => Ok(()),
    }
}
