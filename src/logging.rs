//! Tracing subscriber setup for the two run modes.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVER_FILTER: &str = "recdash=info,tower_http=info";
const CLIENT_FILTER: &str = "recdash=info";

fn filter(default: &str) -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Gateway logging: human-readable lines on stderr.
pub fn init_server() -> Result<()> {
  tracing_subscriber::registry()
    .with(filter(SERVER_FILTER))
    .with(fmt::layer().with_writer(std::io::stderr))
    .try_init()
    .map_err(|e| eyre!("Failed to init logging: {}", e))
}

/// Terminal client logging. The terminal is taken by the UI, so lines go
/// to a daily file under `log_dir`. Keep the guard alive until exit.
pub fn init_client(log_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "recdash.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(filter(CLIENT_FILTER))
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to init logging: {}", e))?;

  Ok(guard)
}
