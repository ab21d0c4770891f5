//! Logging setup
//!
//! Every event goes to stdout and to
//! `<log_directory>/<device>/usb_power.YYYY-MM-DD.log`. A new file starts at
//! UTC midnight and the last 14 files are kept.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::GeneralConfig;

const LOG_FILE_PREFIX: &str = "usb_power";
const LOG_FILE_SUFFIX: &str = "log";
const LOG_RETENTION_DAYS: usize = 14;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Could not create log directory {path}: {source}")]
    Directory { path: PathBuf, source: io::Error },

    #[error("Could not open log file: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),
}

/// Directory name for a device: ASCII punctuation dropped, spaces become `_`
pub fn device_dir_name(switch_name: &str) -> String {
    switch_name
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .map(|c| if c == ' ' { '_' } else { c })
        .collect()
}

pub fn log_dir(general: &GeneralConfig) -> PathBuf {
    general
        .log_directory
        .join(device_dir_name(&general.switch_name))
}

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `default_level`. The returned guard flushes the file
/// writer on drop and must live as long as the process logs.
pub fn setup_logging(
    general: &GeneralConfig,
    default_level: &str,
) -> Result<WorkerGuard, LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| LoggingError::Filter(e.to_string()))?;

    let dir = log_dir(general);
    let appender = rolling_appender(&dir)?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_timer(ChronoLocal::new(TIME_FORMAT.to_string())),
        )
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false)
                .with_timer(ChronoLocal::new(TIME_FORMAT.to_string())),
        )
        .init();

    Ok(guard)
}

fn rolling_appender(dir: &Path) -> Result<RollingFileAppender, LoggingError> {
    fs::create_dir_all(dir).map_err(|source| LoggingError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;

    Ok(RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(LOG_RETENTION_DAYS)
        .build(dir)?)
}
