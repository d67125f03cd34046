//! Configuration management for daylog

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::{
    FlushPolicy, DEFAULT_FLUSH_INTERVAL, DEFAULT_HARD_CAP, DEFAULT_RETENTION_DAYS,
    DEFAULT_SOFT_THRESHOLD,
};

/// Categories of disk errors for diagnostic messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskErrorKind {
    /// Disk is full or quota exceeded
    DiskFull,
    /// Permission denied (read or write)
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// Other IO error
    Other,
}

impl DiskErrorKind {
    /// Short description used in diagnostic output
    pub fn user_message(&self) -> &'static str {
        match self {
            DiskErrorKind::DiskFull => "disk full, log entries discarded",
            DiskErrorKind::PermissionDenied => "permission denied on log directory",
            DiskErrorKind::NotFound => "log directory not found",
            DiskErrorKind::Other => "failed to write log entries",
        }
    }
}

/// Categorize an IO error
pub fn categorize_io_error(e: &std::io::Error) -> DiskErrorKind {
    use std::io::ErrorKind;

    match e.kind() {
        ErrorKind::WriteZero => DiskErrorKind::DiskFull,
        ErrorKind::PermissionDenied => DiskErrorKind::PermissionDenied,
        ErrorKind::NotFound => DiskErrorKind::NotFound,

        // Check raw OS error for disk full on Unix
        _ => {
            #[cfg(unix)]
            {
                if let Some(os_error) = e.raw_os_error() {
                    // ENOSPC (No space left on device) = 28 on Linux, 28 on macOS
                    // EDQUOT (Disk quota exceeded) = 122 on Linux, 69 on macOS
                    if os_error == 28 || os_error == 122 || os_error == 69 {
                        return DiskErrorKind::DiskFull;
                    }
                    // EACCES = 13 on both
                    if os_error == 13 {
                        return DiskErrorKind::PermissionDenied;
                    }
                }
            }
            DiskErrorKind::Other
        }
    }
}

/// Build a diagnostic message from an IO error
pub fn friendly_io_error_message(e: &std::io::Error, context: &str) -> String {
    let kind = categorize_io_error(e);
    match kind {
        DiskErrorKind::Other => format!("{}: {}: {}", context, kind.user_message(), e),
        _ => format!("{}: {}", context, kind.user_message()),
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identifier of the host application; names the log subdirectory
    #[serde(default = "default_app_identifier")]
    pub app_identifier: String,

    /// Explicit log directory, overriding `<data dir>/Logs/<app_identifier>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Period of the background flush in milliseconds (default: 2000)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Buffered entries that force an immediate flush (default: 100)
    #[serde(default = "default_hard_cap")]
    pub hard_cap: usize,

    /// Buffered entries that make the next periodic tick flush early (default: 10)
    #[serde(default = "default_soft_threshold")]
    pub soft_threshold: usize,

    /// Days of log files kept by the retention cleanup (default: 7)
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

fn default_app_identifier() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL.as_millis() as u64
}

fn default_hard_cap() -> usize {
    DEFAULT_HARD_CAP
}

fn default_soft_threshold() -> usize {
    DEFAULT_SOFT_THRESHOLD
}

fn default_retention_days() -> u64 {
    DEFAULT_RETENTION_DAYS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_identifier: default_app_identifier(),
            log_dir: None,
            flush_interval_ms: default_flush_interval_ms(),
            hard_cap: default_hard_cap(),
            soft_threshold: default_soft_threshold(),
            retention_days: default_retention_days(),
        }
    }
}

impl Config {
    /// Load configuration from the default file, or return default if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific file, or return default if not found
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Flush thresholds described by this configuration
    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy {
            hard_cap: self.hard_cap,
            soft_threshold: self.soft_threshold,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
        }
    }

    /// Directory holding the day files
    pub fn logs_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| logs_dir_for(&self.app_identifier))
    }
}

/// Get the application support root (platform data directory)
/// Falls back to ./.daylog if it cannot be determined
pub fn data_root() -> PathBuf {
    try_data_root().unwrap_or_else(|| {
        tracing::warn!("Could not determine data directory, using current directory");
        PathBuf::from(".daylog")
    })
}

/// Try to get the application support root, returning None if unavailable
pub fn try_data_root() -> Option<PathBuf> {
    dirs::data_dir()
}

/// Get the directory holding daylog's own configuration
pub fn config_dir() -> PathBuf {
    data_root().join(env!("CARGO_PKG_NAME"))
}

/// Get the path to the config file
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the log directory for an application: `<data root>/Logs/<identifier>`
pub fn logs_dir_for(app_identifier: &str) -> PathBuf {
    data_root().join("Logs").join(app_identifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.app_identifier, "daylog");
        assert_eq!(config.flush_interval_ms, 2000);
        assert_eq!(config.hard_cap, 100);
        assert_eq!(config.soft_threshold, 10);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = Config::default();
        config.log_dir = Some(PathBuf::from("/var/log/app"));
        config.hard_cap = 50;

        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.hard_cap, 50);
        assert_eq!(parsed.log_dir, Some(PathBuf::from("/var/log/app")));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: Config = toml::from_str("app_identifier = \"com.example.app\"\n").unwrap();
        assert_eq!(parsed.app_identifier, "com.example.app");
        assert_eq!(parsed.flush_interval_ms, 2000);
        assert_eq!(parsed.retention_days, 7);
    }

    #[test]
    fn test_load_from_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("config.toml")).unwrap();
        assert_eq!(config.hard_cap, 100);
    }

    #[test]
    fn test_load_from_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "hard_cap = \"many\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_default_config_matches_default_policy() {
        let config = Config::default();
        assert_eq!(config.flush_policy(), FlushPolicy::default());
        assert_eq!(config.retention_days, DEFAULT_RETENTION_DAYS);
    }

    #[test]
    fn test_flush_policy_from_config() {
        let mut config = Config::default();
        config.flush_interval_ms = 250;
        config.soft_threshold = 4;

        let policy = config.flush_policy();
        assert_eq!(policy.flush_interval, Duration::from_millis(250));
        assert_eq!(policy.soft_threshold, 4);
        assert_eq!(policy.hard_cap, 100);
    }

    #[test]
    fn test_logs_dir_layout() {
        let config = Config {
            app_identifier: "com.example.app".to_string(),
            ..Config::default()
        };
        let dir = config.logs_dir();
        assert!(dir.ends_with("Logs/com.example.app"));

        let config = Config {
            log_dir: Some(PathBuf::from("/tmp/custom")),
            ..Config::default()
        };
        assert_eq!(config.logs_dir(), PathBuf::from("/tmp/custom"));
    }

    #[test]
    fn test_categorize_io_error() {
        use std::io::{Error, ErrorKind};

        assert_eq!(
            categorize_io_error(&Error::from(ErrorKind::PermissionDenied)),
            DiskErrorKind::PermissionDenied
        );
        assert_eq!(
            categorize_io_error(&Error::from(ErrorKind::NotFound)),
            DiskErrorKind::NotFound
        );
        assert_eq!(
            categorize_io_error(&Error::from(ErrorKind::WriteZero)),
            DiskErrorKind::DiskFull
        );
        assert_eq!(
            categorize_io_error(&Error::new(ErrorKind::Other, "boom")),
            DiskErrorKind::Other
        );
    }

    #[test]
    fn test_friendly_io_error_message() {
        use std::io::{Error, ErrorKind};

        let message =
            friendly_io_error_message(&Error::from(ErrorKind::PermissionDenied), "Flush failed");
        assert_eq!(message, "Flush failed: permission denied on log directory");

        let message = friendly_io_error_message(&Error::new(ErrorKind::Other, "boom"), "Flush failed");
        assert!(message.ends_with("boom"));
    }
}
