//! SandStore Logging & Observability Module
//!
//! Structured logging, panic handling with crash reports, and deadlock
//! detection for the task engine. The engine runs named worker threads that
//! park on monitors, so thread names go into every event and the deadlock
//! detector is always worth its cost in debug builds.

mod panic_hook;
mod logging;

pub use panic_hook::init_panic_hook;
pub use logging::{init_logging, prune_logs, LogGuard};

use std::path::PathBuf;
use directories::ProjectDirs;

/// Get the application log directory
pub fn log_dir() -> PathBuf {
    ProjectDirs::from("com", "SandStore", "SandStore")
        .map(|dirs| dirs.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("./logs"))
}

/// Initialize all observability features
///
/// The returned guard flushes buffered log output; keep it alive for the
/// lifetime of the process.
pub fn init() -> anyhow::Result<LogGuard> {
    let guard = init_logging()?;
    init_panic_hook();

    #[cfg(debug_assertions)]
    init_deadlock_detector();

    Ok(guard)
}

#[cfg(debug_assertions)]
fn init_deadlock_detector() {
    use std::thread;
    use std::time::Duration;

    thread::Builder::new()
        .name("deadlock-detector".to_string())
        .spawn(|| loop {
            thread::sleep(Duration::from_secs(10));
            let deadlocks = parking_lot::deadlock::check_deadlock();
            if deadlocks.is_empty() {
                continue;
            }
            tracing::error!("Detected {} deadlocked thread group(s)", deadlocks.len());
            for (i, threads) in deadlocks.iter().enumerate() {
                for t in threads {
                    tracing::error!(group = i, thread_id = ?t.thread_id(), "{:#?}", t.backtrace());
                }
            }
        })
        .expect("failed to spawn deadlock detector");
}
