//! Tracing subscriber setup for the binary.

use color_eyre::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// Without `log_file` events go to stderr. With one they go to a daily rolling
/// file next to it; keep the returned guard alive until exit or buffered lines
/// are lost.
pub fn init(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let Some(path) = log_file else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .with_target(false)
      .try_init()
      .map_err(|e| color_eyre::eyre::eyre!(e))?;
    return Ok(None);
  };

  let directory = match path.parent() {
    Some(dir) if !dir.as_os_str().is_empty() => dir,
    _ => Path::new("."),
  };
  let file_name = path
    .file_name()
    .ok_or_else(|| color_eyre::eyre::eyre!("log file path has no file name: {}", path.display()))?;

  let appender = tracing_appender::rolling::daily(directory, file_name);
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| color_eyre::eyre::eyre!(e))?;

  tracing::debug!(path = %path.display(), "file logging initialized");
  Ok(Some(guard))
}
