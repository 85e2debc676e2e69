//! Operation handle for waiting on and cancelling a scheduled operation.
//!
//! The [`OperationHandle`] is returned by `OperationExecutor::schedule`. It
//! owns the receiving end of a one-shot result channel and, when the
//! operation could not be admitted at schedule time, acquires the admission
//! permit and starts the body on the first wait.
//!
//! # Example
//!
//! ```ignore
//! use opgate::executor::{OperationExecutor, OperationHandle};
//!
//! let handle = executor.schedule(read_op);
//!
//! // Wait with a deadline
//! match handle.get_timeout(Duration::from_secs(2)).await {
//!     Ok(value) => println!("read {:?}", value),
//!     Err(e) if e.is_timeout() => { handle.cancel(); }
//!     Err(e) => return Err(e.into()),
//! }
//! ```

use super::core::OperationExecutor;
use super::error::{ExecutorError, OperationError};
use super::operation::{Delivery, Operation, OperationKey};
use super::registry::Posted;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::time::Instant;
use tracing::debug;

/// Handle to one scheduled operation.
///
/// A handle yields its result at most once. It may be shared by reference,
/// but only one caller may wait on it at a time.
pub struct OperationHandle<T> {
    executor: OperationExecutor,
    operation: Arc<Operation<T>>,
    generation: u64,
    receiver: AsyncMutex<oneshot::Receiver<Delivery<T>>>,
    lifecycle: Mutex<Lifecycle>,
}

/// How the admission step of a wait ended.
enum Admission<T> {
    /// The body is running; wait on the result channel.
    Admitted,
    /// The result channel resolved before a permit was needed.
    Resolved(Result<Delivery<T>, oneshot::error::RecvError>),
}

#[derive(Debug)]
struct Lifecycle {
    state: HandleState,
    retrieved: bool,
}

impl<T> OperationHandle<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn new(
        executor: OperationExecutor,
        operation: Arc<Operation<T>>,
        receiver: oneshot::Receiver<Delivery<T>>,
        generation: u64,
        started: bool,
    ) -> Self {
        let state = if started {
            HandleState::Running
        } else {
            HandleState::Pending
        };
        Self {
            executor,
            operation,
            generation,
            receiver: AsyncMutex::new(receiver),
            lifecycle: Mutex::new(Lifecycle {
                state,
                retrieved: false,
            }),
        }
    }

    /// Waits for the result.
    ///
    /// Acquires an admission permit first if the operation has not started.
    pub async fn get(&self) -> Result<Option<T>, ExecutorError> {
        self.wait(None).await
    }

    /// Waits at most `timeout` for the result.
    ///
    /// The budget covers both waiting for a permit and waiting for the
    /// result. A timeout leaves the operation scheduled; use
    /// `OperationExecutor::get_result` to cancel it automatically.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<Option<T>, ExecutorError> {
        self.wait(Some(timeout)).await
    }

    pub(crate) async fn wait(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<T>, ExecutorError> {
        let mut receiver = self
            .receiver
            .try_lock()
            .map_err(|_| ExecutorError::ConcurrentWait(self.label()))?;

        if self.lifecycle.lock().retrieved {
            return Err(ExecutorError::AlreadyRetrieved(self.label()));
        }

        let began = Instant::now();
        let deadline = timeout.map(|t| began + t);

        let received = match self.admit(&mut receiver, deadline, began).await? {
            Admission::Resolved(received) => received,
            Admission::Admitted => match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, &mut *receiver).await {
                    Ok(received) => received,
                    Err(_) => return Err(self.timed_out(began)),
                },
                None => (&mut *receiver).await,
            },
        };

        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.retrieved = true;
            if lifecycle.state != HandleState::Cancelled {
                lifecycle.state = HandleState::Done;
            }
        }

        let delivery = received.map_err(|_| ExecutorError::Abandoned(self.label()))?;
        delivery.map_err(ExecutorError::from)
    }

    /// Acquires a permit and starts the body if nobody has yet.
    ///
    /// The permit wait also watches the result channel: a cancel, a joined
    /// handle's completion or a result posted for the unstarted operation
    /// ends the wait without a permit.
    async fn admit(
        &self,
        receiver: &mut oneshot::Receiver<Delivery<T>>,
        deadline: Option<Instant>,
        began: Instant,
    ) -> Result<Admission<T>, ExecutorError> {
        if self.executor.entry_started(self.key(), self.generation) != Some(false) {
            return Ok(Admission::Admitted);
        }

        debug!(operation = %self.key(), "Waiting for admission permit");
        let race = async {
            tokio::select! {
                biased;
                received = &mut *receiver => Err(received),
                permit = self.executor.gate().acquire() => Ok(permit),
            }
        };
        let raced = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, race)
                .await
                .map_err(|_| self.timed_out(began))?,
            None => race.await,
        };

        let permit = match raced {
            Ok(permit) => permit.ok_or(ExecutorError::AdmissionClosed)?,
            Err(received) => {
                debug!(operation = %self.key(), "Resolved while waiting for admission");
                return Ok(Admission::Resolved(received));
            }
        };

        if self
            .executor
            .start_deferred(&self.operation, self.generation, permit)
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == HandleState::Pending {
                lifecycle.state = HandleState::Running;
            }
        }
        Ok(Admission::Admitted)
    }

    fn timed_out(&self, began: Instant) -> ExecutorError {
        let elapsed = began.elapsed();
        debug!(operation = %self.key(), ?elapsed, "Wait timed out");
        ExecutorError::Timeout {
            operation: self.label(),
            elapsed,
        }
    }

    /// Cancels the operation.
    ///
    /// Returns false if the operation already completed: its result was
    /// retrieved, or was posted and is waiting to be retrieved. Returns true
    /// if the handle is cancelled, now or by an earlier call.
    ///
    /// The first effective call runs the operation's cancel hook and posts
    /// [`OperationError::Cancelled`] to every handle waiting on the
    /// operation, releasing its permit if it held one.
    pub fn cancel(&self) -> bool {
        let entry = {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.state {
                HandleState::Done => return false,
                HandleState::Cancelled => return true,
                HandleState::Pending | HandleState::Running => {}
            }
            if lifecycle.retrieved {
                return false;
            }

            let Some(entry) = self.executor.take_live(self.key(), self.generation) else {
                return false;
            };
            lifecycle.state = HandleState::Cancelled;
            entry
        };

        self.operation.cancel();
        let released = entry.holds_permit();
        let delivered = entry.complete(Posted::Failed(OperationError::Cancelled), &self.label());
        debug!(operation = %self.key(), released, delivered, "Operation cancelled");
        true
    }

    /// Returns true if this handle was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.lifecycle.lock().state == HandleState::Cancelled
    }

    /// Returns true once the result was retrieved or the handle cancelled.
    pub fn is_done(&self) -> bool {
        matches!(
            self.lifecycle.lock().state,
            HandleState::Done | HandleState::Cancelled
        )
    }
}

impl<T> OperationHandle<T> {
    /// Returns the key of the scheduled operation.
    pub fn key(&self) -> &OperationKey {
        self.operation.key()
    }

    /// Returns the handle's lifecycle state.
    pub fn state(&self) -> HandleState {
        self.lifecycle.lock().state
    }

    pub(crate) fn label(&self) -> String {
        self.operation.key().to_string()
    }
}

impl<T> Drop for OperationHandle<T> {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut();
        if lifecycle.retrieved || lifecycle.state == HandleState::Cancelled {
            return;
        }
        self.receiver.get_mut().close();
        self.executor
            .release_abandoned(self.operation.key(), self.generation);
    }
}

impl<T> std::fmt::Debug for OperationHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("operation", self.operation.key())
            .field("generation", &self.generation)
            .field("state", &self.state())
            .finish()
    }
}

/// Lifecycle of an operation handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HandleState {
    /// Scheduled, waiting for an admission permit.
    #[default]
    Pending,

    /// The body has started; waiting for the result.
    Running,

    /// The result was retrieved.
    Done,

    /// Cancelled before a result was retrieved.
    Cancelled,
}

impl HandleState {
    /// Returns true for `Done` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

impl std::fmt::Display for HandleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Done => write!(f, "Done"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}
