//! In-memory buffer of rendered log lines and the policy deciding when to flush it
//!
//! The buffer itself is not synchronized; the engine owns it behind a single
//! mutex together with the rest of its state.

use std::time::{Duration, Instant};

use chrono::NaiveDate;
use thiserror::Error;

/// Default number of buffered entries that forces an immediate flush
pub const DEFAULT_HARD_CAP: usize = 100;

/// Default number of buffered entries that makes the next periodic tick flush
pub const DEFAULT_SOFT_THRESHOLD: usize = 10;

/// Default period of the background flush loop
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// A rendered entry waiting to be written, tagged with the day file it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedLine {
    pub date: NaiveDate,
    pub line: String,
}

/// Why a flush was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Buffer reached the hard cap
    HardCap,
    /// Buffer is non-empty and the flush interval has elapsed
    IntervalElapsed,
    /// Buffer crossed the soft threshold before the interval elapsed (periodic tick only)
    SoftThreshold,
}

/// Observable state of the flush machinery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// Nothing is due
    Idle,
    /// At least one threshold is crossed; the next tick or record will flush
    Pending,
    /// A batch has been handed to the writer and is not yet on disk
    Flushing,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("hard cap must be at least 1")]
    ZeroHardCap,
    #[error("soft threshold {soft} exceeds hard cap {hard}")]
    SoftAboveHard { soft: usize, hard: usize },
    #[error("flush interval must be greater than zero")]
    ZeroInterval,
}

/// Thresholds controlling when buffered entries are written out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub hard_cap: usize,
    pub soft_threshold: usize,
    pub flush_interval: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            hard_cap: DEFAULT_HARD_CAP,
            soft_threshold: DEFAULT_SOFT_THRESHOLD,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl FlushPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.hard_cap == 0 {
            return Err(PolicyError::ZeroHardCap);
        }
        if self.soft_threshold > self.hard_cap {
            return Err(PolicyError::SoftAboveHard {
                soft: self.soft_threshold,
                hard: self.hard_cap,
            });
        }
        if self.flush_interval.is_zero() {
            return Err(PolicyError::ZeroInterval);
        }
        Ok(())
    }

    /// Decide whether an append should flush before returning
    ///
    /// The soft threshold is deliberately ignored here so that crossing it
    /// does not turn every subsequent record into a flush.
    pub fn on_record(&self, buffer: &LogBuffer, now: Instant) -> Option<FlushTrigger> {
        if buffer.len() >= self.hard_cap {
            Some(FlushTrigger::HardCap)
        } else if self.interval_elapsed(buffer, now) {
            Some(FlushTrigger::IntervalElapsed)
        } else {
            None
        }
    }

    /// Decide whether the periodic loop should flush on this tick
    pub fn on_tick(&self, buffer: &LogBuffer, now: Instant) -> Option<FlushTrigger> {
        if self.interval_elapsed(buffer, now) {
            Some(FlushTrigger::IntervalElapsed)
        } else if !buffer.is_empty() && buffer.len() >= self.soft_threshold {
            Some(FlushTrigger::SoftThreshold)
        } else {
            None
        }
    }

    fn interval_elapsed(&self, buffer: &LogBuffer, now: Instant) -> bool {
        !buffer.is_empty() && buffer.since_last_flush(now) >= self.flush_interval
    }
}

/// Pending lines plus the time of the last flush
#[derive(Debug)]
pub struct LogBuffer {
    lines: Vec<BufferedLine>,
    last_flush: Instant,
}

impl LogBuffer {
    /// Create an empty buffer whose flush clock starts at `now`
    pub fn new(now: Instant) -> Self {
        Self {
            lines: Vec::new(),
            last_flush: now,
        }
    }

    pub fn push(&mut self, date: NaiveDate, line: String) {
        self.lines.push(BufferedLine { date, line });
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Time since the buffer was last drained
    pub fn since_last_flush(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_flush)
    }

    /// Drain every pending line and restart the flush clock
    ///
    /// Lines pushed after this call belong to the next batch.
    pub fn take(&mut self, now: Instant) -> Vec<BufferedLine> {
        self.last_flush = now;
        std::mem::take(&mut self.lines)
    }

    /// Idle or Pending; the engine reports Flushing on top of this
    pub fn state(&self, policy: &FlushPolicy, now: Instant) -> FlushState {
        if policy.on_record(self, now).is_some() || policy.on_tick(self, now).is_some() {
            FlushState::Pending
        } else {
            FlushState::Idle
        }
    }
}
