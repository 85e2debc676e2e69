//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use opgate::config::ConfigFileError;
use opgate::executor::ExecutorError;
use std::fmt;
use std::process;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(ConfigFileError),
    /// Invalid command-line argument
    InvalidArgument(String),
    /// An operation could not be waited on
    Executor(ExecutorError),
    /// A simulation task panicked or was aborted
    Simulation(String),
    /// Permits were still held after every operation resolved
    PermitLeak { available: usize, capacity: usize },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Config(ConfigFileError::InvalidValue { .. }) => {
                eprintln!();
                eprintln!("Fix the value in the config file, or recreate it with:");
                eprintln!("  opgate config init --force");
            }
            CliError::Executor(e) if e.is_timeout() => {
                eprintln!();
                eprintln!("The device did not answer in time and its state is unknown.");
                eprintln!("Disconnect and reconnect before issuing further operations.");
            }
            CliError::PermitLeak { .. } => {
                eprintln!();
                eprintln!("This is a bug in the executor. Please report it with the log file.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::Executor(e) => write!(f, "Operation failed: {}", e),
            CliError::Simulation(msg) => write!(f, "Simulation failed: {}", msg),
            CliError::PermitLeak {
                available,
                capacity,
            } => write!(
                f,
                "{} of {} admission permits were not returned",
                capacity - available,
                capacity
            ),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Executor(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<ExecutorError> for CliError {
    fn from(e: ExecutorError) -> Self {
        CliError::Executor(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permit_leak_message() {
        let err = CliError::PermitLeak {
            available: 1,
            capacity: 3,
        };
        assert_eq!(err.to_string(), "2 of 3 admission permits were not returned");
    }

    #[test]
    fn test_config_error_source() {
        let err = CliError::from(ConfigFileError::WriteError("disk full".into()));
        assert!(err.to_string().contains("disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
