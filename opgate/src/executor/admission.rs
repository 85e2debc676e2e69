//! Admission gate bounding concurrently running operations.
//!
//! The gate is a fair semaphore: permits are granted to blocked waiters in
//! FIFO order. A permit is held from the moment an operation's body starts
//! until its result is posted, so the gate bounds *running* operations, not
//! *scheduled* ones.
//!
//! Permits are owned values. The executor stores each one inside the
//! registry entry of the operation it admitted, which ties the release to the
//! removal of that entry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Counting semaphore with in-flight and peak counters.
#[derive(Debug)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: AtomicUsize,
}

impl AdmissionGate {
    /// Creates a gate with the given number of permits.
    ///
    /// A capacity of zero is clamped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Waits for a permit.
    ///
    /// Returns `None` only if the semaphore was closed.
    pub async fn acquire(&self) -> Option<AdmissionPermit> {
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        Some(self.admit(permit))
    }

    /// Takes a permit without waiting.
    ///
    /// Returns `None` if no permits are available.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.admit(permit))
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> AdmissionPermit {
        let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.update_peak(current);
        trace!(in_flight = current, "Admission permit acquired");

        AdmissionPermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    fn update_peak(&self, current: usize) {
        let mut peak = self.peak_in_flight.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_in_flight.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }

    /// Returns the total number of permits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of permits not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Returns the number of permits currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Returns the highest number of permits held at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }
}

/// A held admission permit, released on drop.
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let remaining = self.in_flight.fetch_sub(1, Ordering::Relaxed) - 1;
        trace!(in_flight = remaining, "Admission permit released");
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_is_clamped() {
        let gate = AdmissionGate::new(0);
        assert_eq!(gate.capacity(), 1);
        assert_eq!(gate.available(), 1);
    }

    #[test]
    fn test_try_acquire_exhausts_permits() {
        let gate = AdmissionGate::new(2);

        let a = gate.try_acquire();
        let b = gate.try_acquire();
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(gate.try_acquire().is_none());
        assert_eq!(gate.available(), 0);
        assert_eq!(gate.in_flight(), 2);

        drop(a);
        assert_eq!(gate.available(), 1);
        assert_eq!(gate.in_flight(), 1);
    }

    #[test]
    fn test_peak_tracks_maximum() {
        let gate = AdmissionGate::new(3);
        let permits: Vec<_> = (0..3).filter_map(|_| gate.try_acquire()).collect();
        assert_eq!(gate.peak_in_flight(), 3);

        drop(permits);
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(gate.peak_in_flight(), 3);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let gate = Arc::new(AdmissionGate::new(1));
        let held = gate.try_acquire().unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.acquire().await.is_some() })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert!(waiter.await.unwrap());
        assert_eq!(gate.available(), 1);
    }
}
