//! Log entries and their NDJSON line representation
//!
//! Each entry renders to exactly one line of JSON with the fields
//! `timestamp`, `file`, `line` and `message`, in that order.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A single log record
///
/// Entries are immutable once constructed; the engine only ever stores their
/// rendered line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogEntry {
    #[serde(with = "rfc3339_millis")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "file")]
    source_file: String,
    #[serde(rename = "line")]
    source_line: u32,
    message: String,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(
        timestamp: DateTime<Utc>,
        source_file: impl Into<String>,
        source_line: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            source_file: source_file.into(),
            source_line,
            message: message.into(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn source_line(&self) -> u32 {
        self.source_line
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Calendar date (local time) whose file this entry belongs to
    pub fn local_date(&self) -> NaiveDate {
        self.timestamp.with_timezone(&Local).date_naive()
    }

    /// Render as a single JSON line, without the trailing newline
    ///
    /// serde_json escapes control characters inside strings, so the output
    /// never contains a raw newline.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse one line of a log file
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// Strip directories from a source path, leaving the file name
///
/// Handles both `/` and `\` separators since `file!()` uses the host's style.
pub fn short_file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Read every entry from a log file
pub fn read_log_file(path: &Path) -> Result<Vec<LogEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read log file {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            LogEntry::from_line(line).with_context(|| {
                format!("Invalid log line {} in {}", index + 1, path.display())
            })
        })
        .collect()
}

mod rfc3339_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::TempDir;

    fn sample_entry() -> LogEntry {
        let timestamp = Utc.with_ymd_and_hms(2026, 1, 21, 14, 30, 45).unwrap();
        LogEntry::new(timestamp, "A.ext", 10, "hello")
    }

    #[test]
    fn test_to_line_field_order() {
        let line = sample_entry().to_line().unwrap();
        assert_eq!(
            line,
            r#"{"timestamp":"2026-01-21T14:30:45.000Z","file":"A.ext","line":10,"message":"hello"}"#
        );
    }

    #[test]
    fn test_to_line_escapes_newlines() {
        let timestamp = Utc.with_ymd_and_hms(2026, 1, 21, 0, 0, 0).unwrap();
        let entry = LogEntry::new(timestamp, "main.rs", 1, "first\nsecond\r\n\"quoted\"");
        let line = entry.to_line().unwrap();

        assert!(!line.contains('\n'));
        assert_eq!(LogEntry::from_line(&line).unwrap(), entry);
    }

    #[test]
    fn test_line_has_exactly_four_fields() {
        let line = sample_entry().to_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), 4);
        assert!(object["line"].is_u64());
        assert!(DateTime::parse_from_rfc3339(object["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_from_line_rejects_extra_fields() {
        let line = r#"{"timestamp":"2026-01-21T14:30:45.000Z","file":"a","line":1,"message":"m","level":"info"}"#;
        assert!(LogEntry::from_line(line).is_err());
    }

    #[test]
    fn test_from_line_rejects_bad_timestamp() {
        let line = r#"{"timestamp":"yesterday","file":"a","line":1,"message":"m"}"#;
        assert!(LogEntry::from_line(line).is_err());
    }

    #[test]
    fn test_short_file_name() {
        assert_eq!(short_file_name("src/logging/engine.rs"), "engine.rs");
        assert_eq!(short_file_name(r"src\logging\engine.rs"), "engine.rs");
        assert_eq!(short_file_name("main.rs"), "main.rs");
        assert_eq!(short_file_name(""), "");
    }

    #[test]
    fn test_read_log_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("2026-01-21.log");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", sample_entry().to_line().unwrap()).unwrap();
        writeln!(file, "{}", sample_entry().to_line().unwrap()).unwrap();

        let entries = read_log_file(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message(), "hello");
        assert_eq!(entries[1].source_file(), "A.ext");
        assert_eq!(entries[1].source_line(), 10);
    }

    #[test]
    fn test_read_log_file_reports_bad_line() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("2026-01-21.log");
        std::fs::write(&path, "not json\n").unwrap();

        let err = read_log_file(&path).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
