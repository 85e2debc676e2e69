//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use super::file::config_directory;
use crate::executor::{DEFAULT_MAX_CONCURRENT_OPERATIONS, DEFAULT_SUCCESS_STATUS};
use std::path::PathBuf;
use std::time::Duration;

/// Default log directory name inside the config directory.
pub const DEFAULT_LOG_DIR_NAME: &str = "logs";

/// Default log file name.
pub const DEFAULT_LOG_FILE_NAME: &str = "opgate.log";

/// Complete application configuration loaded from config.ini.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    /// Executor settings
    pub executor: ExecutorSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Operation executor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Maximum operations running at once
    pub max_concurrent_operations: usize,
    /// Default wait timeout for `execute` (`None` = wait indefinitely)
    pub operation_timeout: Option<Duration>,
    /// Status code reported by the driver on success
    pub success_status: i32,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_operations: DEFAULT_MAX_CONCURRENT_OPERATIONS,
            operation_timeout: None,
            success_status: DEFAULT_SUCCESS_STATUS,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Directory the log file is written to
    pub directory: PathBuf,
    /// Log file name inside `directory`
    pub file: String,
}

impl LoggingSettings {
    /// Full path of the log file.
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file)
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: config_directory().join(DEFAULT_LOG_DIR_NAME),
            file: DEFAULT_LOG_FILE_NAME.to_string(),
        }
    }
}
