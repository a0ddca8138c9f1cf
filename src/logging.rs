//! Logging setup for the CLI.
//!
//! Writes through a non-blocking writer to stderr, or to a daily rolling
//! file when a log directory is given. The filter comes from
//! `PWA_WORKER_LOG` and defaults to `info`.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "PWA_WORKER_LOG";
const LOG_FILE_PREFIX: &str = "pwa-worker.log";
const DEFAULT_FILTER: &str = "info";

/// Flushes buffered log lines when dropped. Keep it alive until exit.
pub struct LoggingGuard {
  _guard: WorkerGuard,
}

pub fn init_logging(log_dir: Option<&Path>) -> Result<LoggingGuard> {
  let (writer, guard) = match log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX))
    }
    None => tracing_appender::non_blocking(std::io::stderr()),
  };

  let layer = tracing_subscriber::fmt::layer()
    .with_writer(writer)
    .with_ansi(log_dir.is_none())
    .with_target(false);

  tracing_subscriber::registry()
    .with(filter(std::env::var(LOG_ENV).ok().as_deref()))
    .with(layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(LoggingGuard { _guard: guard })
}

fn filter(directives: Option<&str>) -> EnvFilter {
  directives
    .and_then(|d| EnvFilter::try_new(d).ok())
    .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
