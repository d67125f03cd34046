//! Log file retention management
//!
//! Handles cleanup of old day files based on the date in their name.

use std::fs;
use std::path::Path;

use anyhow::Result;
use chrono::{Local, NaiveDate};

use super::file_writer::DayFileWriter;

/// Default retention period in days
pub const DEFAULT_RETENTION_DAYS: u64 = 7;

/// Clean up log files older than the retention period
///
/// Returns the number of files deleted.
pub fn cleanup_old_logs(logs_dir: &Path) -> Result<usize> {
    cleanup_old_logs_with_retention(logs_dir, DEFAULT_RETENTION_DAYS)
}

/// Clean up log files older than the specified number of days
///
/// Today's file is always kept, so a retention of 0 keeps only today.
/// Returns the number of files deleted.
pub fn cleanup_old_logs_with_retention(logs_dir: &Path, retention_days: u64) -> Result<usize> {
    let today = Local::now().date_naive();
    let cutoff = today
        .checked_sub_days(chrono::Days::new(retention_days))
        .unwrap_or(NaiveDate::MIN);
    cleanup_logs_before(logs_dir, cutoff)
}

/// Delete every day file dated strictly before `cutoff`
///
/// Files whose name is not `YYYY-MM-DD.log` are left alone.
pub fn cleanup_logs_before(logs_dir: &Path, cutoff: NaiveDate) -> Result<usize> {
    if !logs_dir.exists() {
        return Ok(0);
    }

    let mut deleted_count = 0;

    for entry in fs::read_dir(logs_dir)? {
        let entry = entry?;
        let path = entry.path();

        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(DayFileWriter::date_from_file_name)
        else {
            continue;
        };

        if date < cutoff && path.is_file() {
            match fs::remove_file(&path) {
                Ok(()) => deleted_count += 1,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove old log file"),
            }
        }
    }

    Ok(deleted_count)
}
