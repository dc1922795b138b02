use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use glob::glob;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::configs::LogConfig;

/// Errors raised while installing the logger.
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("Failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid log filter `{0}`")]
    Filter(String),
    #[error("Failed to install global subscriber: {0}")]
    Install(String),
}

/// Rotates log files for a given application and log directory.
///
/// Keeps the `keep` newest files (by the timestamp in their name) matching
/// `<app_name>-*.log` and deletes the rest. Returns the number of files removed.
///
/// # Arguments
/// * `app_name` - The name of the application whose logs are being rotated.
/// * `log_dir` - The directory containing the log files.
/// * `keep` - How many files survive.
pub fn rotate_logs(app_name: &str, log_dir: &Path, keep: usize) -> usize {
    let pattern = format!("{}/{}-*.log", log_dir.display(), app_name);
    let mut log_files: Vec<PathBuf> = match glob(&pattern) {
        Ok(paths) => paths.filter_map(Result::ok).collect(),
        Err(e) => {
            eprintln!("Invalid glob pattern for log rotation {}: {}", pattern, e);
            return 0;
        }
    };

    // Newest first; the timestamp in the name sorts lexically.
    log_files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut removed = 0;
    for old_file in log_files.iter().skip(keep) {
        match fs::remove_file(old_file) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Error deleting old log file {}: {}", old_file.display(), e),
        }
    }
    removed
}

/// Timestamped file name for a new log file.
pub fn log_file_name(app_name: &str) -> String {
    format!("{}-{}.log", app_name, Local::now().format("%Y%m%d_%H%M%S"))
}

/// Installs the global `tracing` subscriber.
///
/// Console output is always on. When `config.dir` is set, old files are
/// rotated (the new file counts towards `keep_files`) and a non-blocking file
/// writer is added, as JSON lines if `config.json` is set. `RUST_LOG`, when
/// present, takes precedence over `config.level`.
///
/// The returned guard flushes the file writer on drop; hold it for the
/// lifetime of the process.
pub fn init_logging(app_name: &str, config: &LogConfig) -> Result<Option<WorkerGuard>, LoggerError> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directive) if !directive.trim().is_empty() => EnvFilter::try_new(&directive)
            .map_err(|_| LoggerError::Filter(directive.clone()))?,
        _ => EnvFilter::try_new(&config.level).map_err(|_| LoggerError::Filter(config.level.clone()))?,
    };

    let console = fmt::layer().with_target(true).boxed();

    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|source| LoggerError::CreateDir {
                path: dir.clone(),
                source,
            })?;
            rotate_logs(app_name, dir, config.keep_files.saturating_sub(1));

            let appender = tracing_appender::rolling::never(dir, log_file_name(app_name));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = if config.json {
                fmt::layer().json().with_writer(writer).with_ansi(false).boxed()
            } else {
                fmt::layer().with_writer(writer).with_ansi(false).boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggerError::Install(e.to_string()))?;

    Ok(guard)
}
