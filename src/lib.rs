//! daylog - buffered, append-only NDJSON logging with one file per day
//!
//! Callers hand messages to a [`logging::LogEngine`]; the engine batches them
//! and appends them to `<data dir>/Logs/<app identifier>/<YYYY-MM-DD>.log`.

pub mod config;
pub mod logging;
