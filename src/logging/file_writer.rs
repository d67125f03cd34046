//! Per-day NDJSON files
//!
//! One file per calendar date, named `YYYY-MM-DD.log`, only ever appended to.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use thiserror::Error;

use super::buffer::BufferedLine;

/// Extension of the files produced by the writer
pub const LOG_EXTENSION: &str = "log";

/// Format of the date part of a log file name
pub const LOG_FILE_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to create log directory {}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create log file {}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to append to log file {}", .path.display())]
    Append {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WriteError {
    pub fn path(&self) -> &Path {
        match self {
            WriteError::CreateDir { path, .. }
            | WriteError::Create { path, .. }
            | WriteError::Append { path, .. } => path,
        }
    }

    pub fn io_error(&self) -> &io::Error {
        match self {
            WriteError::CreateDir { source, .. }
            | WriteError::Create { source, .. }
            | WriteError::Append { source, .. } => source,
        }
    }
}

/// Result of writing one batch
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Entries that reached disk
    pub written: usize,
    /// Entries discarded because their file could not be written
    pub discarded: usize,
    pub errors: Vec<WriteError>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Writes batches of rendered lines into day files under one directory
#[derive(Debug, Clone)]
pub struct DayFileWriter {
    logs_dir: PathBuf,
}

impl DayFileWriter {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// File name used for a given date
    pub fn file_name_for_date(date: NaiveDate) -> String {
        format!("{}.{}", date.format(LOG_FILE_DATE_FORMAT), LOG_EXTENSION)
    }

    /// Parse the date back out of a log file name, if it is one of ours
    pub fn date_from_file_name(name: &str) -> Option<NaiveDate> {
        let stem = name.strip_suffix(LOG_EXTENSION)?.strip_suffix('.')?;
        NaiveDate::parse_from_str(stem, LOG_FILE_DATE_FORMAT).ok()
    }

    /// Location of the file for `date`
    ///
    /// Creates the directory if needed; a failure there is only reported to
    /// the diagnostic log, the path is returned regardless.
    pub fn path_for_date(&self, date: NaiveDate) -> PathBuf {
        if let Err(e) = self.ensure_dir() {
            tracing::warn!(error = %e, "Could not prepare log directory");
        }
        self.file_path(date)
    }

    pub fn ensure_dir(&self) -> Result<(), WriteError> {
        fs::create_dir_all(&self.logs_dir).map_err(|source| WriteError::CreateDir {
            path: self.logs_dir.clone(),
            source,
        })
    }

    /// Write a batch, appending each line to the file of its date
    ///
    /// Lines are grouped by date in order. A group whose file cannot be
    /// written is discarded; the remaining groups are still attempted.
    pub fn append_batch(&self, batch: Vec<BufferedLine>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        if batch.is_empty() {
            return outcome;
        }

        if let Err(e) = self.ensure_dir() {
            outcome.discarded = batch.len();
            outcome.errors.push(e);
            return outcome;
        }

        let mut lines = batch.into_iter().peekable();
        while let Some(first) = lines.next() {
            let date = first.date;
            let mut blob = first.line;
            blob.push('\n');
            let mut count = 1;

            while let Some(next) = lines.next_if(|l| l.date == date) {
                blob.push_str(&next.line);
                blob.push('\n');
                count += 1;
            }

            match self.append_blob(date, blob.as_bytes()) {
                Ok(()) => outcome.written += count,
                Err(e) => {
                    outcome.discarded += count;
                    outcome.errors.push(e);
                }
            }
        }

        outcome
    }

    /// List the log files in the directory, sorted by name
    ///
    /// A missing directory yields an empty list.
    pub fn list_log_files(&self) -> Result<Vec<PathBuf>> {
        if !self.logs_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let entries = fs::read_dir(&self.logs_dir).with_context(|| {
            format!("Failed to read log directory {}", self.logs_dir.display())
        })?;

        for entry in entries {
            let entry = entry.context("Failed to read log directory entry")?;
            let path = entry.path();
            let is_log = path
                .extension()
                .map(|ext| ext == LOG_EXTENSION)
                .unwrap_or(false);
            if is_log && path.is_file() {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    fn file_path(&self, date: NaiveDate) -> PathBuf {
        self.logs_dir.join(Self::file_name_for_date(date))
    }

    fn append_blob(&self, date: NaiveDate, blob: &[u8]) -> Result<(), WriteError> {
        let path = self.file_path(date);
        if path.exists() {
            append_to_existing(&path, blob)
        } else {
            create_with_content(&path, blob)
        }
    }
}

fn append_to_existing(path: &Path, blob: &[u8]) -> Result<(), WriteError> {
    let result = OpenOptions::new()
        .append(true)
        .open(path)
        .and_then(|mut file| {
            file.write_all(blob)?;
            file.sync_data()
        });

    result.map_err(|source| WriteError::Append {
        path: path.to_path_buf(),
        source,
    })
}

/// Write the initial content to a temporary file and rename it into place,
/// so the day file never appears half-written
fn create_with_content(path: &Path, blob: &[u8]) -> Result<(), WriteError> {
    let tmp_path = temp_path_for(path);
    let result = File::create(&tmp_path)
        .and_then(|mut file| {
            file.write_all(blob)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp_path, path));

    result.map_err(|source| {
        let _ = fs::remove_file(&tmp_path);
        WriteError::Create {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    fn line(date: NaiveDate, text: &str) -> BufferedLine {
        BufferedLine {
            date,
            line: format!(r#"{{"message":"{}"}}"#, text),
        }
    }

    #[test]
    fn test_file_name_for_date() {
        assert_eq!(DayFileWriter::file_name_for_date(day(5)), "2026-01-05.log");
    }

    #[test]
    fn test_date_from_file_name() {
        assert_eq!(
            DayFileWriter::date_from_file_name("2026-01-05.log"),
            Some(day(5))
        );
        assert_eq!(DayFileWriter::date_from_file_name("2026-01-05.txt"), None);
        assert_eq!(DayFileWriter::date_from_file_name("notes.log"), None);
        assert_eq!(DayFileWriter::date_from_file_name(".2026-01-05.log.tmp"), None);
    }

    #[test]
    fn test_path_for_date_differs_per_day() {
        let temp_dir = TempDir::new().unwrap();
        let writer = DayFileWriter::new(temp_dir.path().join("Logs").join("app"));

        let first = writer.path_for_date(day(1));
        let second = writer.path_for_date(day(2));

        assert_ne!(first, second);
        assert!(writer.logs_dir().is_dir());
        assert!(!first.exists());
    }

    #[test]
    fn test_append_batch_creates_then_appends() {
        let temp_dir = TempDir::new().unwrap();
        let writer = DayFileWriter::new(temp_dir.path());

        let outcome = writer.append_batch(vec![line(day(1), "a"), line(day(1), "b")]);
        assert!(outcome.is_success());
        assert_eq!(outcome.written, 2);

        let outcome = writer.append_batch(vec![line(day(1), "c")]);
        assert_eq!(outcome.written, 1);

        let content = fs::read_to_string(writer.path_for_date(day(1))).unwrap();
        assert_eq!(
            content,
            "{\"message\":\"a\"}\n{\"message\":\"b\"}\n{\"message\":\"c\"}\n"
        );
    }

    #[test]
    fn test_append_batch_splits_by_date() {
        let temp_dir = TempDir::new().unwrap();
        let writer = DayFileWriter::new(temp_dir.path());

        let outcome = writer.append_batch(vec![
            line(day(1), "late"),
            line(day(2), "early"),
            line(day(2), "morning"),
        ]);
        assert_eq!(outcome.written, 3);

        let first = fs::read_to_string(writer.path_for_date(day(1))).unwrap();
        let second = fs::read_to_string(writer.path_for_date(day(2))).unwrap();
        assert_eq!(first.lines().count(), 1);
        assert!(first.contains("late"));
        assert_eq!(second.lines().count(), 2);
        assert!(!second.contains("late"));
    }

    #[test]
    fn test_append_batch_empty_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let writer = DayFileWriter::new(temp_dir.path().join("logs"));

        let outcome = writer.append_batch(Vec::new());
        assert!(outcome.is_success());
        assert_eq!(outcome.written, 0);
        assert!(!writer.logs_dir().exists());
    }

    #[test]
    fn test_append_batch_directory_failure_discards() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();
        let writer = DayFileWriter::new(blocker.join("logs"));

        let outcome = writer.append_batch(vec![line(day(1), "a"), line(day(1), "b")]);
        assert!(!outcome.is_success());
        assert_eq!(outcome.written, 0);
        assert_eq!(outcome.discarded, 2);
        assert!(matches!(outcome.errors[0], WriteError::CreateDir { .. }));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let writer = DayFileWriter::new(temp_dir.path());
        writer.append_batch(vec![line(day(1), "a")]);

        let names: Vec<String> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["2026-01-01.log".to_string()]);
    }

    #[test]
    fn test_list_log_files_filters_and_is_stable() {
        let temp_dir = TempDir::new().unwrap();
        let writer = DayFileWriter::new(temp_dir.path());
        writer.append_batch(vec![line(day(2), "b"), line(day(3), "c")]);
        writer.append_batch(vec![line(day(1), "a")]);
        fs::write(temp_dir.path().join("notes.txt"), b"x").unwrap();
        fs::create_dir(temp_dir.path().join("nested.log")).unwrap();

        let first = writer.list_log_files().unwrap();
        let second = writer.list_log_files().unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![
                temp_dir.path().join("2026-01-01.log"),
                temp_dir.path().join("2026-01-02.log"),
                temp_dir.path().join("2026-01-03.log"),
            ]
        );
    }

    #[test]
    fn test_list_log_files_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let writer = DayFileWriter::new(temp_dir.path().join("missing"));
        assert!(writer.list_log_files().unwrap().is_empty());
    }
}
