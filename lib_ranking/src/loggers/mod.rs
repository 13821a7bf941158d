//! # Loggers Module
//!
//! Installs the global `tracing` subscriber: a human-readable console layer
//! on stdout and a JSON layer written to a daily rolling file.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the configured
//! level. Keep the returned `WorkerGuard` alive for the life of the process;
//! dropping it flushes and stops the file writer.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("failed to create log directory: {0}")]
    Directory(#[from] std::io::Error),
    #[error("invalid log filter {filter:?}: {reason}")]
    Filter { filter: String, reason: String },
    #[error("a global subscriber is already installed: {0}")]
    AlreadyInstalled(String),
}

/// Builds the filter: `RUST_LOG` wins, then `level`.
pub fn build_filter(level: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| LoggerError::Filter {
            filter: level.to_string(),
            reason: e.to_string(),
        })
}

/// Sets up console and rolling-file logging for `app_name`.
///
/// Files land in `log_dir` as `<app_name>.<YYYY-MM-DD>`.
pub fn setup_logging(
    app_name: &str,
    log_dir: &Path,
    level: &str,
) -> Result<WorkerGuard, LoggerError> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = rolling::daily(log_dir, app_name);
    let (file_writer, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .json();

    tracing_subscriber::registry()
        .with(build_filter(level)?)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggerError::AlreadyInstalled(e.to_string()))?;

    tracing::info!(level, log_dir = %log_dir.display(), "logging initialized");
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(matches!(
            build_filter("lib_ranking=notalevel"),
            Err(LoggerError::Filter { .. })
        ));
        assert!(build_filter("debug").is_ok());
    }

    #[test]
    fn creates_log_directory_and_file() {
        let root = tempfile::tempdir().unwrap();
        let log_dir = root.path().join("nested").join("logs");

        let guard = setup_logging("ranking-test", &log_dir, "info").unwrap();
        tracing::info!("hello from the logger test");
        drop(guard);

        let written: Vec<_> = std::fs::read_dir(&log_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("ranking-test"))
            .collect();
        assert_eq!(written.len(), 1);

        // The subscriber is process-global; a second install must fail cleanly.
        assert!(matches!(
            setup_logging("ranking-test", &log_dir, "info"),
            Err(LoggerError::AlreadyInstalled(_))
        ));
    }
}
