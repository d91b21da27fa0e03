//! Logging setup.
//!
//! The library itself only emits `tracing` events; hosts choose a
//! subscriber. These helpers cover the two common cases: console output
//! for tools and tests, and a non-blocking daily-rolling file for long
//! running processes. The `RUST_LOG` environment variable overrides the
//! default directive in both.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Logs to stderr. Safe to call more than once; later calls are no-ops.
pub fn init_console(default_directive: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .with_writer(std::io::stderr)
        .try_init();
}

/// Logs to a daily-rolling file under `directory`. The returned guard
/// flushes buffered events; hold it for the life of the process.
pub fn init_file(
    directory: &Path,
    file_name_prefix: &str,
    default_directive: &str,
) -> Option<WorkerGuard> {
    let appender = tracing_appender::rolling::daily(directory, file_name_prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let initialized = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .is_ok();
    initialized.then_some(guard)
}
