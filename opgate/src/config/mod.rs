//! Configuration file support.
//!
//! Settings live in an INI file at `~/.opgate/config.ini`:
//!
//! ```ini
//! [executor]
//! max_concurrent_operations = 1
//! operation_timeout_ms = 0
//! success_status = 0
//!
//! [logging]
//! directory = ~/.opgate/logs
//! file = opgate.log
//! ```
//!
//! The file is split the same way across modules:
//!
//! - `settings`: plain data structs, one per `[section]`
//! - `parser`: `Ini` → [`ConfigFile`] with validation
//! - `writer`: [`ConfigFile`] → commented INI text
//! - `file`: loading, saving and default paths
//!
//! # Example
//!
//! ```ignore
//! use opgate::config::ConfigFile;
//! use opgate::executor::{ExecutorConfig, OperationExecutor};
//!
//! let config = ConfigFile::load()?;
//! let executor = OperationExecutor::new(ExecutorConfig::from(&config.executor));
//! ```

mod file;
mod parser;
mod settings;
mod writer;

pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    ConfigFile, ExecutorSettings, LoggingSettings, DEFAULT_LOG_DIR_NAME, DEFAULT_LOG_FILE_NAME,
};
