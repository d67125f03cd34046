use std::path::PathBuf;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use daylog::config::Config;
use daylog::logging::{self, LogEngine};

/// Environment variable pointing at an alternative config file
const CONFIG_ENV: &str = "DAYLOG_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics first so config and startup problems are visible
    logging::init_diagnostics()?;

    let config = match std::env::var_os(CONFIG_ENV) {
        Some(path) => Config::load_from(&PathBuf::from(path))?,
        None => Config::load()?,
    };
    let logs_dir = config.logs_dir();

    match logging::cleanup_old_logs_with_retention(&logs_dir, config.retention_days) {
        Ok(count) if count > 0 => tracing::info!("Cleaned up {} old log files", count),
        Ok(_) => {}
        Err(e) => tracing::warn!("Log retention cleanup failed: {:#}", e),
    }

    let engine = LogEngine::from_config(&config)?;
    tracing::info!("Logging to: {}", logs_dir.display());

    // Every stdin line becomes one entry
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number: u32 = 0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    line_number = line_number.saturating_add(1);
                    engine.record(line, "stdin", line_number);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    break;
                }
            },
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, flushing pending entries");
                break;
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}
