use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log to a daily file under `log_dir`. RUST_LOG wins over `level`.
///
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init(log_dir: &Path, level: Option<&str>) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(level.unwrap_or("info")))
    .unwrap_or_else(|_| EnvFilter::new("info"));

  let appender = tracing_appender::rolling::daily(log_dir, "tripsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}
