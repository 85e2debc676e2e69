//! Logging infrastructure for opgate.
//!
//! Provides structured logging with file output and optional console output:
//! - Writes to `logs/opgate.log` (cleared on session start)
//! - Optionally mirrors to stdout for interactive runs
//! - Configurable via RUST_LOG environment variable

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard will flush and close the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initialize logging system.
///
/// Creates the log directory if needed, clears the previous log file and
/// installs the global subscriber.
///
/// # Arguments
///
/// * `log_dir` - Directory for log files (e.g., "logs")
/// * `log_file` - Log filename (e.g., "opgate.log")
/// * `stdout` - Also write events to stdout
/// * `debug` - Default to DEBUG instead of INFO when RUST_LOG is unset
///
/// # Errors
///
/// Returns error if log directory cannot be created or log file cannot be cleared
pub fn init_logging(
    log_dir: &Path,
    log_file: &str,
    stdout: bool,
    debug: bool,
) -> Result<LoggingGuard, io::Error> {
    prepare_log_file(log_dir, log_file)?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE);

    let stdout_layer = stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stdout)
            .with_ansi(true)
            .compact()
    });

    let default_level = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Creates the log directory and truncates the log file.
///
/// Each session starts with an empty log.
fn prepare_log_file(log_dir: &Path, log_file: &str) -> Result<PathBuf, io::Error> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(log_file);
    fs::write(&path, "")?;
    Ok(path)
}

/// Get default log directory path.
pub fn default_log_dir() -> &'static str {
    "logs"
}

/// Get default log file name.
pub fn default_log_file() -> &'static str {
    "opgate.log"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        assert_eq!(default_log_dir(), "logs");
        assert_eq!(default_log_file(), "opgate.log");
    }

    #[test]
    fn test_guard_holds_worker() {
        use tracing_appender::non_blocking::NonBlocking;

        let (non_blocking, guard) = NonBlocking::new(std::io::sink());
        drop(non_blocking);

        let _logging_guard = LoggingGuard { _file_guard: guard };
    }

    // init_logging installs a global subscriber, so the file preparation
    // it performs is tested on its own.
    #[test]
    fn test_prepare_creates_nested_directory() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("nested").join("logs");

        let path = prepare_log_file(&log_dir, default_log_file()).unwrap();
        assert!(log_dir.is_dir());
        assert_eq!(path, log_dir.join("opgate.log"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_prepare_clears_previous_session() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("opgate.log");
        fs::write(&path, "previous session").unwrap();

        prepare_log_file(temp_dir.path(), "opgate.log").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_prepare_fails_when_directory_is_a_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let blocker = temp_dir.path().join("logs");
        fs::write(&blocker, "not a directory").unwrap();

        assert!(prepare_log_file(&blocker, "opgate.log").is_err());
    }
}
