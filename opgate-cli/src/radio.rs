//! Simulated half-duplex radio.
//!
//! Stands in for a real peripheral driver: each read is answered after a
//! fixed latency with a GATT-style status code, some reads fail and some
//! are never answered at all.

use opgate::executor::{Operation, OperationKey};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Status reported for a successful request.
pub const GATT_SUCCESS: i32 = 0x00;

/// Generic failure status.
pub const GATT_ERROR: i32 = 0x85;

/// Describes the status codes the simulated radio can report.
pub fn describe_status(status: i32) -> String {
    match status {
        GATT_SUCCESS => "success".to_string(),
        0x05 => "insufficient authentication".to_string(),
        0x08 => "connection timeout".to_string(),
        GATT_ERROR => format!("GATT error (0x{:02X})", status),
        other => format!("unknown status 0x{:02X} ({})", other, other),
    }
}

/// Radio that answers reads from a timer task.
#[derive(Debug)]
pub struct SimulatedRadio {
    latency: Duration,
    fail_every: Option<usize>,
    hang_every: Option<usize>,
    requests: AtomicUsize,
    cancelled: AtomicUsize,
}

impl SimulatedRadio {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            fail_every: None,
            hang_every: None,
            requests: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        }
    }

    /// Every `n`-th request reports [`GATT_ERROR`]. Zero disables failures.
    pub fn failing_every(mut self, n: usize) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    /// Every `n`-th request is never answered. Zero disables hangs.
    pub fn hanging_every(mut self, n: usize) -> Self {
        self.hang_every = (n > 0).then_some(n);
        self
    }

    /// Requests sent to the radio so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Requests the executor cancelled.
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Builds an operation reading the characteristic at `handle`.
    ///
    /// The value is the handle in little-endian order followed by the
    /// request's sequence number.
    pub fn read(self: &Arc<Self>, handle: u16) -> Operation<Vec<u8>> {
        let key = OperationKey::new("read").with(handle);
        let radio = Arc::clone(self);
        let on_cancel = Arc::clone(self);

        Operation::asynchronous(key, move |completion| {
            let sequence = radio.requests.fetch_add(1, Ordering::SeqCst) + 1;

            if radio.hang_every.is_some_and(|n| sequence % n == 0) {
                debug!(operation = %completion.key(), sequence, "Radio dropped request");
                return Ok(());
            }

            let status = if radio.fail_every.is_some_and(|n| sequence % n == 0) {
                GATT_ERROR
            } else {
                GATT_SUCCESS
            };
            let mut value = handle.to_le_bytes().to_vec();
            value.push(sequence as u8);

            let latency = radio.latency;
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                let delivered = completion.status(status, Some(value));
                trace!(operation = %completion.key(), status, delivered, "Radio answered");
            });
            Ok(())
        })
        .with_cancel(move || {
            on_cancel.cancelled.fetch_add(1, Ordering::SeqCst);
        })
    }
}
