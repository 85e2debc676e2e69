//! Executor configuration.
//!
//! This module contains the [`ExecutorConfig`] struct and related constants
//! for configuring the operation executor.

use std::time::Duration;

// =============================================================================
// Configuration Constants
// =============================================================================

/// Default maximum concurrently running operations.
///
/// Half-duplex peripherals can only service one command at a time.
pub const DEFAULT_MAX_CONCURRENT_OPERATIONS: usize = 1;

/// Status code treated as success by `notify_completion`.
pub const DEFAULT_SUCCESS_STATUS: i32 = 0;

// =============================================================================
// Executor Configuration
// =============================================================================

/// Configuration for the operation executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum operations whose bodies may run at once.
    ///
    /// Scheduling is not limited; only execution is. Zero is treated as one.
    pub max_concurrent_operations: usize,

    /// Timeout applied by `execute` and `execute_nonnull`.
    ///
    /// `None` waits indefinitely.
    pub default_timeout: Option<Duration>,

    /// Status code that `notify_completion` treats as success.
    pub success_status: i32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: DEFAULT_MAX_CONCURRENT_OPERATIONS,
            default_timeout: None,
            success_status: DEFAULT_SUCCESS_STATUS,
        }
    }
}

impl ExecutorConfig {
    /// Creates a configuration allowing `max_concurrent_operations` at once.
    pub fn new(max_concurrent_operations: usize) -> Self {
        Self {
            max_concurrent_operations: max_concurrent_operations.max(1),
            ..Self::default()
        }
    }

    /// Sets the timeout used by `execute`.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Sets the status code treated as success.
    pub fn with_success_status(mut self, status: i32) -> Self {
        self.success_status = status;
        self
    }
}

impl From<&crate::config::ExecutorSettings> for ExecutorConfig {
    fn from(settings: &crate::config::ExecutorSettings) -> Self {
        Self {
            max_concurrent_operations: settings.max_concurrent_operations.max(1),
            default_timeout: settings.operation_timeout,
            success_status: settings.success_status,
        }
    }
}
