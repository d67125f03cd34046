//! Log buffer and flush engine
//!
//! All buffer mutation happens under one mutex. When a flush is due the
//! pending lines are swapped out and, still under that mutex, queued to a
//! single writer task, so batches reach disk in the order they were cut and
//! an append racing a flush always lands in the next batch. File I/O runs on
//! the blocking pool, never under the buffer lock.
//!
//! Hard-cap flushes started from [`LogEngine::record`] are fire-and-forget:
//! the caller never waits for the disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{friendly_io_error_message, Config};

use super::buffer::{BufferedLine, FlushPolicy, FlushState, FlushTrigger, LogBuffer, PolicyError};
use super::entry::LogEntry;
use super::file_writer::{BatchOutcome, DayFileWriter};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid flush policy")]
    InvalidPolicy(#[from] PolicyError),
    #[error("log directory {} is already owned by another engine", .0.display())]
    DirectoryInUse(PathBuf),
    #[error("log engine must be started from within a tokio runtime")]
    NoRuntime,
}

/// Counters describing what the engine has done so far
#[derive(Debug, Default)]
struct EngineStats {
    entries_recorded: AtomicU64,
    entries_written: AtomicU64,
    entries_dropped: AtomicU64,
    batches_written: AtomicU64,
    batches_failed: AtomicU64,
}

impl EngineStats {
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn apply(&self, outcome: &BatchOutcome) {
        Self::add(&self.entries_written, outcome.written);
        Self::add(&self.entries_dropped, outcome.discarded);
        if outcome.is_success() {
            Self::add(&self.batches_written, 1);
        } else {
            Self::add(&self.batches_failed, 1);
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            entries_recorded: self.entries_recorded.load(Ordering::Relaxed),
            entries_written: self.entries_written.load(Ordering::Relaxed),
            entries_dropped: self.entries_dropped.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Entries accepted into the buffer
    pub entries_recorded: u64,
    /// Entries that reached a day file
    pub entries_written: u64,
    /// Entries lost to serialization, write failures or shutdown
    pub entries_dropped: u64,
    pub batches_written: u64,
    pub batches_failed: u64,
}

/// A batch handed to the writer task, with an optional completion signal
struct WriteRequest {
    batch: Vec<BufferedLine>,
    done: Option<oneshot::Sender<()>>,
}

struct EngineState {
    buffer: LogBuffer,
    last_timestamp: Option<DateTime<Utc>>,
    /// `None` once the engine has been shut down
    queue: Option<mpsc::UnboundedSender<WriteRequest>>,
}

impl EngineState {
    /// Timestamps never go backwards, even if the wall clock does
    fn next_timestamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let timestamp = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }
}

#[derive(Default)]
struct Tasks {
    ticker: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

struct Inner {
    state: Mutex<EngineState>,
    policy: FlushPolicy,
    writer: DayFileWriter,
    stats: Arc<EngineStats>,
    /// Non-empty batches queued or being written
    in_flight: Arc<AtomicUsize>,
    tasks: Mutex<Tasks>,
    lease: Mutex<Option<DirectoryLease>>,
    /// Flips to true once shutdown has drained the queue and joined the writer
    stopped: watch::Sender<bool>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap out the buffer and queue it for writing
    ///
    /// Must be called with the state lock held so queue order matches swap
    /// order. Returns false if the engine is shut down or the writer is gone.
    fn dispatch(
        &self,
        state: &mut EngineState,
        now: Instant,
        done: Option<oneshot::Sender<()>>,
    ) -> bool {
        let batch = state.buffer.take(now);
        let len = batch.len();

        let Some(queue) = state.queue.as_ref() else {
            EngineStats::add(&self.stats.entries_dropped, len);
            return false;
        };

        if len > 0 {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
        }
        if queue.send(WriteRequest { batch, done }).is_err() {
            if len > 0 {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            EngineStats::add(&self.stats.entries_dropped, len);
            warn!(entries = len, "Log writer is gone, dropping batch");
            return false;
        }
        true
    }

    /// One pass of the periodic loop; returns false once the engine is closed
    ///
    /// `deadline` is the instant the tick was scheduled for. A tick flush
    /// restarts the flush clock from it rather than from the wake-up time, so
    /// the next tick always sees a full interval.
    fn tick(&self, deadline: Instant) -> bool {
        let mut state = self.lock_state();
        if state.queue.is_none() {
            return false;
        }

        let now = Instant::now();
        if let Some(trigger) = self.policy.on_tick(&state.buffer, now) {
            debug!(?trigger, entries = state.buffer.len(), "Periodic flush");
            self.dispatch(&mut state, deadline.min(now), None);
        }
        true
    }
}

/// Handle to a running log engine
///
/// Cheap to clone; every clone feeds the same buffer. Construct one per log
/// directory at the application's composition root and pass it to call sites.
#[derive(Clone)]
pub struct LogEngine {
    inner: Arc<Inner>,
}

impl LogEngine {
    /// Start an engine writing to `logs_dir`
    ///
    /// Spawns the writer task and the periodic flush loop on the current
    /// tokio runtime.
    pub fn start(logs_dir: impl Into<PathBuf>, policy: FlushPolicy) -> Result<Self, EngineError> {
        policy.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let writer = DayFileWriter::new(logs_dir);
        if let Err(e) = writer.ensure_dir() {
            warn!(
                "{}",
                friendly_io_error_message(e.io_error(), "Could not create log directory")
            );
        }
        let lease = DirectoryLease::acquire(writer.logs_dir())?;

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(EngineStats::default());
        let in_flight = Arc::new(AtomicUsize::new(0));

        let inner = Arc::new(Inner {
            state: Mutex::new(EngineState {
                buffer: LogBuffer::new(Instant::now()),
                last_timestamp: None,
                queue: Some(queue_tx),
            }),
            policy,
            writer: writer.clone(),
            stats: Arc::clone(&stats),
            in_flight: Arc::clone(&in_flight),
            tasks: Mutex::new(Tasks::default()),
            lease: Mutex::new(Some(lease)),
            stopped: watch::channel(false).0,
        });

        let writer_task = runtime.spawn(run_writer(writer, stats, in_flight, queue_rx));
        let ticker_task = runtime.spawn(run_ticker(Arc::downgrade(&inner), policy.flush_interval));

        if let Ok(mut tasks) = inner.tasks.lock() {
            tasks.writer = Some(writer_task);
            tasks.ticker = Some(ticker_task);
        }

        info!(
            dir = %inner.writer.logs_dir().display(),
            hard_cap = policy.hard_cap,
            soft_threshold = policy.soft_threshold,
            interval_ms = policy.flush_interval.as_millis() as u64,
            "Log engine started"
        );

        Ok(Self { inner })
    }

    /// Start an engine from application configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let logs_dir = config.logs_dir();
        Self::start(&logs_dir, config.flush_policy())
            .with_context(|| format!("Failed to start log engine for {}", logs_dir.display()))
    }

    /// Record one entry
    ///
    /// Never fails and never waits on disk I/O. The entry is timestamped,
    /// rendered and buffered; if the hard cap is reached or the flush interval
    /// has elapsed the buffer is queued for writing before returning.
    pub fn record(
        &self,
        message: impl Into<String>,
        source_file: impl Into<String>,
        source_line: u32,
    ) {
        let message = message.into();
        let source_file = source_file.into();
        let inner = &self.inner;

        let mut state = inner.lock_state();
        if state.queue.is_none() {
            EngineStats::add(&inner.stats.entries_dropped, 1);
            debug!("Log engine is shut down, dropping entry");
            return;
        }

        let timestamp = state.next_timestamp(Utc::now());
        let entry = LogEntry::new(timestamp, source_file, source_line, message);
        let line = match entry.to_line() {
            Ok(line) => line,
            Err(e) => {
                EngineStats::add(&inner.stats.entries_dropped, 1);
                debug!(error = %e, "Dropping log entry that failed to serialize");
                return;
            }
        };

        state.buffer.push(entry.local_date(), line);
        EngineStats::add(&inner.stats.entries_recorded, 1);

        let now = Instant::now();
        if let Some(trigger) = inner.policy.on_record(&state.buffer, now) {
            if trigger == FlushTrigger::HardCap {
                debug!(entries = state.buffer.len(), "Hard cap reached, flushing");
            }
            inner.dispatch(&mut state, now, None);
        }
    }

    /// Write everything buffered so far
    ///
    /// Returns once this batch and every batch queued before it has been
    /// written or discarded.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut state = self.inner.lock_state();
            if !self.inner.dispatch(&mut state, Instant::now(), Some(done_tx)) {
                return;
            }
        }
        let _ = done_rx.await;
    }

    /// Flush remaining entries and stop the background tasks
    ///
    /// Entries recorded afterwards are dropped. Safe to call more than once
    /// and from any clone; every caller returns only after the drain is done.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        let already_closed = {
            let mut state = self.inner.lock_state();
            if state.queue.is_some() {
                self.inner.dispatch(&mut state, Instant::now(), Some(done_tx));
                state.queue = None;
                false
            } else {
                true
            }
        };
        if already_closed {
            // Another caller owns the drain; wait for it to finish
            let mut stopped = self.inner.stopped.subscribe();
            let _ = stopped.wait_for(|stopped| *stopped).await;
            return;
        }

        let tasks = std::mem::take(
            &mut *self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if let Some(ticker) = tasks.ticker {
            ticker.abort();
        }

        let _ = done_rx.await;
        if let Some(writer) = tasks.writer {
            let _ = writer.await;
        }

        if let Ok(mut lease) = self.inner.lease.lock() {
            lease.take();
        }
        self.inner.stopped.send_replace(true);
        info!(stats = ?self.stats(), "Log engine stopped");
    }

    /// Path of the file holding entries for `date`
    pub fn log_file_path(&self, date: NaiveDate) -> PathBuf {
        self.inner.writer.path_for_date(date)
    }

    /// All log files in the engine's directory, sorted by name
    pub fn log_files(&self) -> Result<Vec<PathBuf>> {
        self.inner.writer.list_log_files()
    }

    pub fn logs_dir(&self) -> &Path {
        self.inner.writer.logs_dir()
    }

    pub fn policy(&self) -> FlushPolicy {
        self.inner.policy
    }

    pub fn state(&self) -> FlushState {
        if self.inner.in_flight.load(Ordering::SeqCst) > 0 {
            return FlushState::Flushing;
        }
        let state = self.inner.lock_state();
        state.buffer.state(&self.inner.policy, Instant::now())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}

/// Record a formatted message with the caller's file name and line
///
/// ```ignore
/// daylog::record!(engine, "loaded {} items", count);
/// ```
#[macro_export]
macro_rules! record {
    ($engine:expr, $($arg:tt)+) => {
        $engine.record(
            ::std::format!($($arg)+),
            $crate::logging::short_file_name(::std::file!()),
            ::std::line!(),
        )
    };
}

/// Consume write requests one at a time until every sender is gone
async fn run_writer(
    writer: DayFileWriter,
    stats: Arc<EngineStats>,
    in_flight: Arc<AtomicUsize>,
    mut queue: mpsc::UnboundedReceiver<WriteRequest>,
) {
    while let Some(WriteRequest { batch, done }) = queue.recv().await {
        if !batch.is_empty() {
            let entries = batch.len();
            let writer = writer.clone();
            match tokio::task::spawn_blocking(move || writer.append_batch(batch)).await {
                Ok(outcome) => {
                    for e in &outcome.errors {
                        warn!(
                            path = %e.path().display(),
                            "{}",
                            friendly_io_error_message(e.io_error(), "Log flush failed")
                        );
                    }
                    stats.apply(&outcome);
                }
                Err(e) => {
                    warn!(error = %e, entries, "Log write task failed");
                    EngineStats::add(&stats.entries_dropped, entries);
                    EngineStats::add(&stats.batches_failed, 1);
                }
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        if let Some(done) = done {
            let _ = done.send(());
        }
    }
    debug!("Log writer stopped");
}

/// Periodic flush loop; exits when the engine is dropped or shut down
async fn run_ticker(inner: Weak<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        let deadline = ticker.tick().await.into_std();
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.tick(deadline) {
            break;
        }
    }
}

fn leased_dirs() -> &'static Mutex<HashSet<PathBuf>> {
    static LEASES: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    LEASES.get_or_init(Default::default)
}

/// Exclusive claim on a log directory within this process
struct DirectoryLease {
    dir: PathBuf,
}

impl DirectoryLease {
    fn acquire(dir: &Path) -> Result<Self, EngineError> {
        let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        let mut leases = leased_dirs().lock().unwrap_or_else(PoisonError::into_inner);
        if !leases.insert(dir.clone()) {
            return Err(EngineError::DirectoryInUse(dir));
        }
        Ok(Self { dir })
    }
}

impl Drop for DirectoryLease {
    fn drop(&mut self) {
        let mut leases = leased_dirs().lock().unwrap_or_else(PoisonError::into_inner);
        leases.remove(&self.dir);
    }
}
