//! Error types for the operation executor.
//!
//! Two layers of error exist:
//!
//! - [`OperationError`]: the operation's own failure, as reported by the
//!   driver, a synchronous body, a non-success status code, or cancellation.
//!   It is cloneable because every handle waiting on one in-flight operation
//!   receives a copy.
//! - [`ExecutorError`]: what a waiting caller sees. Wraps domain failures and
//!   adds the waiting-boundary conditions (timeout, interruption) and handle
//!   misuse.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure reported for an operation.
#[derive(Debug, Clone, Error)]
pub enum OperationError {
    /// The operation completed with a non-success status code.
    #[error("operation failed with status {status}: {message}")]
    Status { status: i32, message: String },

    /// The operation was cancelled before a result was posted.
    #[error("operation cancelled")]
    Cancelled,

    /// The driver or body reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The driver reported a failure carrying an underlying error.
    #[error("driver error: {0}")]
    Driver(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A posted value did not match the result type the operation was
    /// scheduled with.
    #[error("result posted for operation {0} has an unexpected type")]
    TypeMismatch(String),

    /// An operation with an equal key is already in flight with a different
    /// result type.
    #[error("operation {0} is already in flight with a different result type")]
    Conflict(String),
}

impl OperationError {
    /// Creates a failure from a plain message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Creates a failure wrapping an underlying driver error.
    pub fn driver<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Driver(Arc::new(error))
    }

    /// Returns the status code for status failures.
    pub fn status(&self) -> Option<i32> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if this failure was synthesized by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Error returned to callers waiting on an operation.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The operation itself failed.
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// No result arrived before the caller's deadline.
    ///
    /// The operation may still complete later, so the peripheral's state is
    /// unknown. This is terminal from the executor's point of view.
    #[error(
        "operation {operation} timed out after {elapsed:?}; device state is unknown, \
         disconnect and reconnect"
    )]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    /// The wait was interrupted and the operation was cancelled.
    #[error("interrupted while waiting for operation {0}")]
    Interrupted(String),

    /// `get` was called on a handle whose result was already retrieved.
    #[error("get called twice on handle for operation {0}")]
    AlreadyRetrieved(String),

    /// Another caller is already waiting on this handle.
    #[error("handle for operation {0} is already being waited on")]
    ConcurrentWait(String),

    /// The operation succeeded without a value where one was required.
    #[error("operation {0} completed without a value")]
    MissingValue(String),

    /// The result channel closed without delivering a result.
    #[error("result channel for operation {0} closed without a result")]
    Abandoned(String),

    /// The admission semaphore was closed.
    #[error("admission gate closed")]
    AdmissionClosed,
}

impl ExecutorError {
    /// Returns true for timeout errors.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns the domain failure, if this error wraps one.
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }
}
