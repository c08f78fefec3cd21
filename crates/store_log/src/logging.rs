//! Structured logging setup with tracing

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking log writer flushing; dropped at process exit
pub struct LogGuard {
    _writer: WorkerGuard,
}

/// Initialize the logging system
///
/// Console output (debug builds) plus a JSON daily log file. Thread names
/// are recorded on every event so worker-pool activity can be followed.
pub fn init_logging() -> anyhow::Result<LogGuard> {
    let log_dir = super::log_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "store.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer()
        .json()
        .with_thread_names(true)
        .with_writer(non_blocking);

    #[cfg(debug_assertions)]
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_thread_names(true))
        .with(file_layer)
        .init();

    #[cfg(not(debug_assertions))]
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .init();

    tracing::info!("Logging initialized at {}", log_dir.display());
    Ok(LogGuard { _writer: guard })
}

/// Delete log files older than the given number of days
pub fn prune_logs(days: u32) -> anyhow::Result<usize> {
    use std::time::{Duration, SystemTime};

    let log_dir = super::log_dir();
    if !log_dir.exists() {
        return Ok(0);
    }

    let threshold = SystemTime::now() - Duration::from_secs(days as u64 * 24 * 60 * 60);
    let mut deleted = 0;

    for entry in std::fs::read_dir(&log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.starts_with("store.log"));
        if !is_log {
            continue;
        }
        let expired = entry
            .metadata()
            .and_then(|m| m.modified())
            .map_or(false, |modified| modified < threshold);
        if expired && std::fs::remove_file(&path).is_ok() {
            deleted += 1;
            tracing::debug!("Deleted old log: {}", path.display());
        }
    }

    Ok(deleted)
}
