//! CLI runner for common setup.
//!
//! Encapsulates config loading and logging initialization so command
//! handlers start from the same state.

use crate::error::CliError;
use opgate::config::ConfigFile;
use opgate::logging::{init_logging, LoggingGuard};
use tracing::info;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
}

impl CliRunner {
    /// Create a new CLI runner, loading config and initializing logging.
    ///
    /// Logs go to the configured file. Debug mode raises the default level
    /// to DEBUG and mirrors events to stdout.
    pub fn with_debug(debug_mode: bool) -> Result<Self, CliError> {
        let config = ConfigFile::load()?;

        let logging_guard = init_logging(
            &config.logging.directory,
            &config.logging.file,
            debug_mode,
            debug_mode,
        )
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("opgate v{}", opgate::VERSION);
        info!(
            log_file = %self.config.logging.path().display(),
            "opgate CLI: {} command", command
        );
    }
}
