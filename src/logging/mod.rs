//! Logging system for daylog
//!
//! Buffers log entries in memory, flushes them to one NDJSON file per day,
//! and provides utilities for listing and expiring those files.

mod buffer;
mod diagnostics;
mod engine;
mod entry;
mod file_writer;
mod retention;

pub use buffer::{
    BufferedLine, FlushPolicy, FlushState, FlushTrigger, LogBuffer, PolicyError,
    DEFAULT_FLUSH_INTERVAL, DEFAULT_HARD_CAP, DEFAULT_SOFT_THRESHOLD,
};
pub use diagnostics::init_diagnostics;
pub use engine::{EngineError, LogEngine, StatsSnapshot};
pub use entry::{read_log_file, short_file_name, LogEntry};
pub use file_writer::{BatchOutcome, DayFileWriter, WriteError, LOG_EXTENSION};
pub use retention::{
    cleanup_logs_before, cleanup_old_logs, cleanup_old_logs_with_retention,
    DEFAULT_RETENTION_DAYS,
};
