//! Logging setup for the `swell-collector` binary.
//!
//! Output goes to stderr and to `{log_dir}/collector_YYYYMMDD.log`
//! (appended, one file per day). The level is taken from `RUST_LOG` and
//! defaults to `info`. Library code only emits `tracing` events; nothing
//! in the library calls [`init_logging`].

use chrono::{Local, NaiveDate};
use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default directory for log files
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Keeps the file writer alive.
///
/// Dropping this guard flushes and closes the log file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

impl std::fmt::Debug for LoggingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingGuard").finish_non_exhaustive()
    }
}

/// Log file name for `date`
pub fn log_file_name(date: NaiveDate) -> String {
    format!("collector_{}.log", date.format("%Y%m%d"))
}

/// Install the global subscriber.
///
/// Creates `log_dir` if needed. The returned guard must be held until the
/// process exits.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
pub fn init_logging(log_dir: &Path) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;

    let file_appender =
        tracing_appender::rolling::never(log_dir, log_file_name(Local::now().date_naive()));
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(false);

    // stdout carries only the bundle path
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
