//! Operation executor façade.
//!
//! The [`OperationExecutor`] owns no threads or tasks. It is a coordination
//! structure shared by callers and driver callbacks:
//!
//! - `schedule` registers an operation and starts it at once if a permit is
//!   free; otherwise the first handle that waits acquires the permit.
//! - `notify_*` is called by the driver when the hardware reports back. The
//!   registry entry is removed, the result delivered, and the permit released.
//! - `execute`, `wait_for` and `get_result` wrap handle waits with the
//!   timeout and interruption rescue logic.

use super::admission::{AdmissionGate, AdmissionPermit};
use super::config::ExecutorConfig;
use super::error::{ExecutorError, OperationError};
use super::handle::OperationHandle;
use super::operation::{Completion, Operation, OperationKey, Started};
use super::registry::{Entry, Posted, Registry};
use super::status::{GenericStatusDescriber, StatusDescriber};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Generation used by handles that never registered an entry.
pub(crate) const DETACHED_GENERATION: u64 = 0;

/// Snapshot of executor occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Total admission permits.
    pub capacity: usize,
    /// Permits not currently held.
    pub available_permits: usize,
    /// Operations whose bodies are running.
    pub in_flight: usize,
    /// Highest number of operations running at once.
    pub peak_in_flight: usize,
    /// Registered operations awaiting a result, started or not.
    pub pending_operations: usize,
}

/// Admission-controlled executor for hardware-bound operations.
///
/// Cloning is cheap; clones share the same registry and permits.
#[derive(Clone)]
pub struct OperationExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    config: ExecutorConfig,
    gate: AdmissionGate,
    registry: Mutex<Registry>,
    describer: Box<dyn StatusDescriber>,
}

impl OperationExecutor {
    /// Creates an executor with the generic status describer.
    pub fn new(config: ExecutorConfig) -> Self {
        Self::with_describer(config, GenericStatusDescriber)
    }

    /// Creates an executor allowing `max_concurrent_operations` at once.
    pub fn with_max_concurrent(max_concurrent_operations: usize) -> Self {
        Self::new(ExecutorConfig::new(max_concurrent_operations))
    }

    /// Creates an executor that describes failure statuses with `describer`.
    pub fn with_describer(config: ExecutorConfig, describer: impl StatusDescriber) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                gate: AdmissionGate::new(config.max_concurrent_operations),
                config,
                registry: Mutex::new(Registry::default()),
                describer: Box::new(describer),
            }),
        }
    }

    /// Returns the configuration the executor was built with.
    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Returns the number of admission permits not currently held.
    pub fn available_permits(&self) -> usize {
        self.inner.gate.available()
    }

    /// Returns the number of operations awaiting a result.
    pub fn pending_operations(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Returns an occupancy snapshot.
    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            capacity: self.inner.gate.capacity(),
            available_permits: self.inner.gate.available(),
            in_flight: self.inner.gate.in_flight(),
            peak_in_flight: self.inner.gate.peak_in_flight(),
            pending_operations: self.pending_operations(),
        }
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Schedules an operation and returns a handle to its result.
    ///
    /// Never waits. If a permit is free the body runs before this returns;
    /// otherwise it runs when the first handle waits and obtains a permit.
    ///
    /// If an operation with an equal key is still in flight, the new handle
    /// joins it: the body does not run again and both handles receive the
    /// same result. If that in-flight operation has a different result type,
    /// the new handle resolves at once with [`OperationError::Conflict`].
    pub fn schedule<T>(&self, operation: Operation<T>) -> OperationHandle<T>
    where
        T: Clone + Send + 'static,
    {
        let operation = Arc::new(operation);
        let key = operation.key().clone();
        let (tx, rx) = oneshot::channel();

        let mut registry = self.inner.registry.lock();
        let tx = match registry.get_mut(&key) {
            Some(entry) => {
                let generation = entry.generation();
                let started = entry.is_started();
                return match entry.add_waiter(tx) {
                    Ok(()) => {
                        debug!(operation = %key, started, "Joined in-flight operation");
                        OperationHandle::new(self.clone(), operation, rx, generation, started)
                    }
                    Err(tx) => {
                        warn!(
                            operation = %key,
                            "Operation already in flight with a different result type"
                        );
                        let _ = tx.send(Err(OperationError::Conflict(key.to_string())));
                        OperationHandle::new(
                            self.clone(),
                            operation,
                            rx,
                            DETACHED_GENERATION,
                            false,
                        )
                    }
                };
            }
            None => tx,
        };

        let permit = self.inner.gate.try_acquire();
        let started = permit.is_some();
        let generation = registry.insert(key.clone(), tx, permit);
        drop(registry);

        if started {
            debug!(operation = %key, "Operation admitted");
            self.start(&operation);
        } else {
            debug!(operation = %key, "Admission deferred until first wait");
        }

        OperationHandle::new(self.clone(), operation, rx, generation, started)
    }

    /// Runs the body and posts its result if it finished synchronously.
    fn start<T>(&self, operation: &Operation<T>)
    where
        T: Clone + Send + 'static,
    {
        let key = operation.key();
        let completion = Completion::new(self.clone(), key.clone());
        if let Started::Finished(delivery) = operation.start(completion) {
            if let Err(e) = &delivery {
                debug!(operation = %key, error = %e, "Operation body failed synchronously");
            }
            self.post_result(key, Posted::from(delivery));
        }
    }

    // =========================================================================
    // Completion callbacks
    // =========================================================================

    /// Posts a successful result with a value.
    ///
    /// Returns false if no entry was waiting (late or duplicate completion).
    pub fn notify_success<T: Send + 'static>(&self, key: &OperationKey, value: T) -> bool {
        self.post_result(key, Posted::Value(Box::new(value)))
    }

    /// Posts a successful result without a value.
    pub fn notify_success_empty(&self, key: &OperationKey) -> bool {
        self.post_result(key, Posted::Empty)
    }

    /// Posts a failure.
    pub fn notify_failure(&self, key: &OperationKey, error: OperationError) -> bool {
        self.post_result(key, Posted::Failed(error))
    }

    /// Posts a raw status code with an optional value.
    ///
    /// Any status other than the configured success status becomes an
    /// [`OperationError::Status`] carrying the describer's message.
    pub fn notify_completion<T: Send + 'static>(
        &self,
        key: &OperationKey,
        status: i32,
        value: Option<T>,
    ) -> bool {
        if status == self.inner.config.success_status {
            return match value {
                Some(value) => self.notify_success(key, value),
                None => self.notify_success_empty(key),
            };
        }

        let message = self.inner.describer.describe(status);
        debug!(operation = %key, status, %message, "Operation reported failure status");
        self.notify_failure(key, OperationError::Status { status, message })
    }

    /// Posts a raw status code with no value.
    pub fn notify_status(&self, key: &OperationKey, status: i32) -> bool {
        self.notify_completion::<()>(key, status, None)
    }

    /// Removes the entry, delivers the result, releases the permit.
    fn post_result(&self, key: &OperationKey, posted: Posted) -> bool {
        let entry = self.inner.registry.lock().remove(key);
        match entry {
            Some(entry) => {
                let released = entry.holds_permit();
                let delivered = entry.complete(posted, &key.to_string());
                debug!(operation = %key, delivered, released, "Result posted");
                true
            }
            None => {
                warn!(
                    operation = %key,
                    "Dropping result for operation with no pending entry"
                );
                false
            }
        }
    }

    // =========================================================================
    // Handle support
    // =========================================================================

    /// Returns whether the live entry has started, or `None` if it is gone.
    pub(crate) fn entry_started(&self, key: &OperationKey, generation: u64) -> Option<bool> {
        self.inner
            .registry
            .lock()
            .live(key, generation)
            .map(|entry| entry.is_started())
    }

    pub(crate) fn gate(&self) -> &AdmissionGate {
        &self.inner.gate
    }

    /// Starts a deferred operation under `permit`.
    ///
    /// Returns true if the operation is now running (started here or by
    /// another waiter), false if it was resolved or cancelled meanwhile. The
    /// permit is released in every case except the first.
    pub(crate) fn start_deferred<T>(
        &self,
        operation: &Operation<T>,
        generation: u64,
        permit: AdmissionPermit,
    ) -> bool
    where
        T: Clone + Send + 'static,
    {
        {
            let mut registry = self.inner.registry.lock();
            match registry.live(operation.key(), generation) {
                Some(entry) if !entry.is_started() => entry.start(permit),
                Some(_) => return true,
                None => return false,
            }
        }

        debug!(operation = %operation.key(), "Operation admitted after wait");
        self.start(operation);
        true
    }

    /// Takes the live entry out of the registry for cancellation.
    pub(crate) fn take_live(&self, key: &OperationKey, generation: u64) -> Option<Entry> {
        self.inner.registry.lock().remove_live(key, generation)
    }

    /// Drops an entry that never started and has nobody left waiting.
    pub(crate) fn release_abandoned(&self, key: &OperationKey, generation: u64) {
        let mut registry = self.inner.registry.lock();
        let abandoned = registry
            .live(key, generation)
            .is_some_and(|entry| !entry.is_started() && entry.is_abandoned());
        if abandoned {
            registry.remove(key);
            debug!(operation = %key, "Removed unstarted operation with no waiters");
        }
    }

    // =========================================================================
    // Waiting helpers
    // =========================================================================

    /// Schedules `operation` and waits for its result.
    ///
    /// Uses the configured default timeout, if any.
    pub async fn execute<T>(&self, operation: Operation<T>) -> Result<Option<T>, ExecutorError>
    where
        T: Clone + Send + 'static,
    {
        let handle = self.schedule(operation);
        Self::get_result(&handle, self.inner.config.default_timeout).await
    }

    /// Schedules `operation` and waits at most `timeout` for its result.
    pub async fn execute_timeout<T>(
        &self,
        operation: Operation<T>,
        timeout: Duration,
    ) -> Result<Option<T>, ExecutorError>
    where
        T: Clone + Send + 'static,
    {
        let handle = self.schedule(operation);
        Self::get_result(&handle, Some(timeout)).await
    }

    /// Like [`execute`](Self::execute), but an empty result is an error.
    pub async fn execute_nonnull<T>(&self, operation: Operation<T>) -> Result<T, ExecutorError>
    where
        T: Clone + Send + 'static,
    {
        let label = operation.key().to_string();
        self.execute(operation)
            .await?
            .ok_or(ExecutorError::MissingValue(label))
    }

    /// Like [`execute_timeout`](Self::execute_timeout), but an empty result
    /// is an error.
    pub async fn execute_nonnull_timeout<T>(
        &self,
        operation: Operation<T>,
        timeout: Duration,
    ) -> Result<T, ExecutorError>
    where
        T: Clone + Send + 'static,
    {
        let label = operation.key().to_string();
        self.execute_timeout(operation, timeout)
            .await?
            .ok_or(ExecutorError::MissingValue(label))
    }

    /// Waits on each handle in order and returns their results.
    ///
    /// Stops at the first error.
    pub async fn wait_for<T>(
        &self,
        handles: &[OperationHandle<T>],
    ) -> Result<Vec<Option<T>>, ExecutorError>
    where
        T: Clone + Send + 'static,
    {
        Self::wait_all(handles, None).await
    }

    /// Waits on each handle in order under one shared deadline.
    ///
    /// Time spent on earlier handles is deducted from the budget of later
    /// ones; the whole list must resolve within `timeout`.
    pub async fn wait_for_timeout<T>(
        &self,
        handles: &[OperationHandle<T>],
        timeout: Duration,
    ) -> Result<Vec<Option<T>>, ExecutorError>
    where
        T: Clone + Send + 'static,
    {
        Self::wait_all(handles, Some(Instant::now() + timeout)).await
    }

    async fn wait_all<T>(
        handles: &[OperationHandle<T>],
        deadline: Option<Instant>,
    ) -> Result<Vec<Option<T>>, ExecutorError>
    where
        T: Clone + Send + 'static,
    {
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            results.push(Self::get_result(handle, remaining).await?);
        }
        Ok(results)
    }

    /// Waits for a handle's result, rescuing completions that race a timeout.
    ///
    /// On timeout the operation is cancelled. If cancellation fails because
    /// the result had just been posted, that result is fetched and returned
    /// instead of the timeout. Otherwise the timeout error is returned and
    /// the device state should be considered unknown.
    pub async fn get_result<T>(
        handle: &OperationHandle<T>,
        timeout: Option<Duration>,
    ) -> Result<Option<T>, ExecutorError>
    where
        T: Clone + Send + 'static,
    {
        Self::await_result(handle, timeout, None).await
    }

    /// Like [`get_result`](Self::get_result), but also stops waiting when
    /// `interrupt` is cancelled.
    ///
    /// An interrupted wait cancels the operation and returns
    /// [`ExecutorError::Interrupted`], unless the result had already arrived,
    /// in which case it is returned. The token is left cancelled either way
    /// so the caller still sees the interruption.
    pub async fn get_result_interruptible<T>(
        handle: &OperationHandle<T>,
        timeout: Option<Duration>,
        interrupt: &CancellationToken,
    ) -> Result<Option<T>, ExecutorError>
    where
        T: Clone + Send + 'static,
    {
        Self::await_result(handle, timeout, Some(interrupt)).await
    }

    async fn await_result<T>(
        handle: &OperationHandle<T>,
        timeout: Option<Duration>,
        interrupt: Option<&CancellationToken>,
    ) -> Result<Option<T>, ExecutorError>
    where
        T: Clone + Send + 'static,
    {
        let mut rescuing = false;
        loop {
            let outcome = if rescuing {
                handle.get().await
            } else {
                let wait = handle.wait(timeout);
                match interrupt {
                    Some(token) => tokio::select! {
                        biased;
                        outcome = wait => outcome,
                        _ = token.cancelled() => Err(ExecutorError::Interrupted(handle.label())),
                    },
                    None => wait.await,
                }
            };

            match outcome {
                Err(err @ (ExecutorError::Timeout { .. } | ExecutorError::Interrupted(_)))
                    if !rescuing =>
                {
                    if handle.cancel() {
                        warn!(operation = %handle.key(), error = %err, "Abandoned wait cancelled operation");
                        return Err(err);
                    }
                    debug!(
                        operation = %handle.key(),
                        "Operation completed as wait was abandoned, fetching result"
                    );
                    rescuing = true;
                }
                outcome => return outcome,
            }
        }
    }
}

impl std::fmt::Debug for OperationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationExecutor")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(name: &str) -> OperationKey {
        OperationKey::new(name)
    }

    /// Asynchronous operation whose body only counts starts.
    fn pending_op(name: &str, starts: &Arc<AtomicUsize>) -> Operation<u32> {
        let starts = Arc::clone(starts);
        Operation::asynchronous(key(name), move |_completion| {
            starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_schedule_starts_when_permit_free() {
        let executor = OperationExecutor::with_max_concurrent(1);
        let starts = Arc::new(AtomicUsize::new(0));

        let _handle = executor.schedule(pending_op("a", &starts));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(executor.available_permits(), 0);
        assert_eq!(executor.pending_operations(), 1);
    }

    #[test]
    fn test_schedule_defers_when_saturated() {
        let executor = OperationExecutor::with_max_concurrent(1);
        let starts = Arc::new(AtomicUsize::new(0));

        let _a = executor.schedule(pending_op("a", &starts));
        let _b = executor.schedule(pending_op("b", &starts));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(executor.pending_operations(), 2);
    }

    #[test]
    fn test_notify_releases_permit() {
        let executor = OperationExecutor::with_max_concurrent(1);
        let starts = Arc::new(AtomicUsize::new(0));

        let _handle = executor.schedule(pending_op("a", &starts));
        assert!(executor.notify_success(&key("a"), 5u32));
        assert_eq!(executor.available_permits(), 1);
        assert_eq!(executor.pending_operations(), 0);
    }

    #[test]
    fn test_duplicate_notify_is_dropped() {
        let executor = OperationExecutor::with_max_concurrent(2);
        let starts = Arc::new(AtomicUsize::new(0));

        let _handle = executor.schedule(pending_op("a", &starts));
        assert!(executor.notify_success(&key("a"), 1u32));
        assert!(!executor.notify_success(&key("a"), 2u32));
        assert!(!executor.notify_status(&key("a"), 0));
        assert_eq!(executor.available_permits(), 2);
    }

    #[test]
    fn test_notify_unknown_key_is_dropped() {
        let executor = OperationExecutor::with_max_concurrent(1);
        assert!(!executor.notify_failure(&key("ghost"), OperationError::failed("late")));
        assert_eq!(executor.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_synchronous_body_failure_is_posted() {
        let executor = OperationExecutor::with_max_concurrent(1);
        let op: Operation<u32> =
            Operation::synchronous(key("boom"), || Err(OperationError::failed("bus fault")));

        let handle = executor.schedule(op);
        assert_eq!(executor.available_permits(), 1);

        let err = handle.get().await.unwrap_err();
        assert!(err.to_string().contains("bus fault"));
    }

    #[tokio::test]
    async fn test_asynchronous_body_error_is_posted() {
        let executor = OperationExecutor::with_max_concurrent(1);
        let op: Operation<u32> = Operation::asynchronous(key("refused"), |_completion| {
            Err(OperationError::failed("radio busy"))
        });

        let err = executor.execute(op).await.unwrap_err();
        assert!(err.to_string().contains("radio busy"));
        assert_eq!(executor.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_completion_posts_through_executor() {
        let executor = OperationExecutor::with_max_concurrent(1);
        let op: Operation<Vec<u8>> = Operation::asynchronous(key("read"), |completion| {
            tokio::spawn(async move {
                completion.status(0, Some(vec![1, 2, 3]));
            });
            Ok(())
        });

        let value = executor.execute_nonnull(op).await.unwrap();
        assert_eq!(value, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_custom_describer_message() {
        let executor = OperationExecutor::with_describer(ExecutorConfig::new(1), |status: i32| {
            format!("gatt error {}", status)
        });
        let handle = executor.schedule(pending_op("write", &Arc::new(AtomicUsize::new(0))));

        assert!(executor.notify_status(&key("write"), 0x85));
        let err = handle.get().await.unwrap_err();
        assert!(err.to_string().contains("gatt error 133"));
    }

    #[tokio::test]
    async fn test_success_status_is_configurable() {
        let config = ExecutorConfig::new(1).with_success_status(1);
        let executor = OperationExecutor::new(config);
        let handle = executor.schedule(pending_op("a", &Arc::new(AtomicUsize::new(0))));

        assert!(executor.notify_completion(&key("a"), 1, Some(9u32)));
        assert_eq!(handle.get().await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_execute_nonnull_rejects_empty() {
        let executor = OperationExecutor::with_max_concurrent(1);
        let op: Operation<u32> = Operation::synchronous(key("empty"), || Ok(None));

        let err = executor.execute_nonnull(op).await.unwrap_err();
        assert!(matches!(err, ExecutorError::MissingValue(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_uses_default_timeout() {
        let config = ExecutorConfig::new(1).with_default_timeout(Duration::from_millis(20));
        let executor = OperationExecutor::new(config);
        let starts = Arc::new(AtomicUsize::new(0));

        let err = executor.execute(pending_op("slow", &starts)).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(executor.available_permits(), 1);
        assert_eq!(executor.pending_operations(), 0);
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let executor = OperationExecutor::with_max_concurrent(2);
        let starts = Arc::new(AtomicUsize::new(0));
        let _a = executor.schedule(pending_op("a", &starts));
        let _b = executor.schedule(pending_op("b", &starts));
        let _c = executor.schedule(pending_op("c", &starts));

        let stats = executor.stats();
        assert_eq!(stats.capacity, 2);
        assert_eq!(stats.available_permits, 0);
        assert_eq!(stats.in_flight, 2);
        assert_eq!(stats.peak_in_flight, 2);
        assert_eq!(stats.pending_operations, 3);
    }
}
