//! Registry of in-flight operations.
//!
//! Each outstanding [`OperationKey`] maps to one [`Entry`] holding the
//! one-shot senders of every handle waiting on that operation, the admission
//! permit once the body has started, and a generation number that tells a
//! handle whether the entry it registered with is still the live one.
//!
//! Entries are type-erased so completions can be posted by key alone (a
//! failure or status code does not know the result type). The typed side is
//! recovered when the value is delivered.

use super::admission::AdmissionPermit;
use super::error::OperationError;
use super::operation::{Delivery, OperationKey};
use std::any::Any;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// A result as posted by a driver, before it is matched to a result type.
pub(crate) enum Posted {
    Value(Box<dyn Any + Send>),
    Empty,
    Failed(OperationError),
}

impl<T: Send + 'static> From<Delivery<T>> for Posted {
    fn from(delivery: Delivery<T>) -> Self {
        match delivery {
            Ok(Some(value)) => Posted::Value(Box::new(value)),
            Ok(None) => Posted::Empty,
            Err(e) => Posted::Failed(e),
        }
    }
}

trait Waiters: Send {
    /// Sends the result to every waiter. Returns how many were still listening.
    fn deliver(self: Box<Self>, posted: Posted, label: &str) -> usize;

    /// Returns true once every waiting receiver has gone away.
    fn all_closed(&self) -> bool;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct TypedWaiters<T> {
    senders: Vec<oneshot::Sender<Delivery<T>>>,
}

impl<T: Clone + Send + 'static> Waiters for TypedWaiters<T> {
    fn deliver(self: Box<Self>, posted: Posted, label: &str) -> usize {
        let delivery: Delivery<T> = match posted {
            Posted::Value(value) => match value.downcast::<T>() {
                Ok(value) => Ok(Some(*value)),
                Err(_) => Err(OperationError::TypeMismatch(label.to_string())),
            },
            Posted::Empty => Ok(None),
            Posted::Failed(e) => Err(e),
        };

        self.senders
            .into_iter()
            .filter(|tx| !tx.is_closed())
            .map(|tx| tx.send(delivery.clone()).is_ok())
            .filter(|sent| *sent)
            .count()
    }

    fn all_closed(&self) -> bool {
        self.senders.iter().all(|tx| tx.is_closed())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// One in-flight operation.
pub(crate) struct Entry {
    generation: u64,
    started: bool,
    permit: Option<AdmissionPermit>,
    waiters: Box<dyn Waiters>,
}

impl Entry {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started
    }

    /// Records that the body is running under `permit`.
    pub(crate) fn start(&mut self, permit: AdmissionPermit) {
        self.started = true;
        self.permit = Some(permit);
    }

    /// Adds a waiter of the same result type.
    ///
    /// Hands the sender back if the entry was registered with another type.
    pub(crate) fn add_waiter<T: Clone + Send + 'static>(
        &mut self,
        tx: oneshot::Sender<Delivery<T>>,
    ) -> Result<(), oneshot::Sender<Delivery<T>>> {
        match self.waiters.as_any_mut().downcast_mut::<TypedWaiters<T>>() {
            Some(waiters) => {
                waiters.senders.push(tx);
                Ok(())
            }
            None => Err(tx),
        }
    }

    pub(crate) fn is_abandoned(&self) -> bool {
        self.waiters.all_closed()
    }

    /// Delivers the result and releases the permit, in that order.
    pub(crate) fn complete(self, posted: Posted, label: &str) -> usize {
        let Entry {
            permit, waiters, ..
        } = self;
        let delivered = waiters.deliver(posted, label);
        drop(permit);
        delivered
    }

    /// Whether this entry held a permit.
    pub(crate) fn holds_permit(&self) -> bool {
        self.permit.is_some()
    }
}

/// Map of in-flight operations keyed by structural identity.
#[derive(Default)]
pub(crate) struct Registry {
    entries: HashMap<OperationKey, Entry>,
    next_generation: u64,
}

impl Registry {
    /// Registers a new entry and returns its generation.
    pub(crate) fn insert<T: Clone + Send + 'static>(
        &mut self,
        key: OperationKey,
        tx: oneshot::Sender<Delivery<T>>,
        permit: Option<AdmissionPermit>,
    ) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        let entry = Entry {
            generation,
            started: permit.is_some(),
            permit,
            waiters: Box::new(TypedWaiters { senders: vec![tx] }),
        };
        self.entries.insert(key, entry);
        generation
    }

    pub(crate) fn get_mut(&mut self, key: &OperationKey) -> Option<&mut Entry> {
        self.entries.get_mut(key)
    }

    /// Returns the entry only if it is still the given generation.
    pub(crate) fn live(&mut self, key: &OperationKey, generation: u64) -> Option<&mut Entry> {
        self.entries
            .get_mut(key)
            .filter(|entry| entry.generation == generation)
    }

    pub(crate) fn remove(&mut self, key: &OperationKey) -> Option<Entry> {
        self.entries.remove(key)
    }

    /// Removes the entry only if it is still the given generation.
    pub(crate) fn remove_live(&mut self, key: &OperationKey, generation: u64) -> Option<Entry> {
        self.live(key, generation)?;
        self.entries.remove(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> OperationKey {
        OperationKey::new(name)
    }

    #[test]
    fn test_insert_assigns_increasing_generations() {
        let mut registry = Registry::default();
        let (tx1, _rx1) = oneshot::channel::<Delivery<u32>>();
        let (tx2, _rx2) = oneshot::channel::<Delivery<u32>>();

        let g1 = registry.insert(key("a"), tx1, None);
        let g2 = registry.insert(key("b"), tx2, None);
        assert!(g2 > g1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_complete_delivers_to_all_waiters() {
        let mut registry = Registry::default();
        let (tx1, mut rx1) = oneshot::channel::<Delivery<u32>>();
        let (tx2, mut rx2) = oneshot::channel::<Delivery<u32>>();

        registry.insert(key("a"), tx1, None);
        assert!(registry.get_mut(&key("a")).unwrap().add_waiter(tx2).is_ok());

        let entry = registry.remove(&key("a")).unwrap();
        assert_eq!(entry.complete(Posted::Value(Box::new(7u32)), "[a]"), 2);
        assert_eq!(rx1.try_recv().unwrap().unwrap(), Some(7));
        assert_eq!(rx2.try_recv().unwrap().unwrap(), Some(7));
    }

    #[test]
    fn test_add_waiter_rejects_other_type() {
        let mut registry = Registry::default();
        let (tx, _rx) = oneshot::channel::<Delivery<u32>>();
        registry.insert(key("a"), tx, None);

        let (other, _other_rx) = oneshot::channel::<Delivery<String>>();
        assert!(registry.get_mut(&key("a")).unwrap().add_waiter(other).is_err());
    }

    #[test]
    fn test_wrong_value_type_becomes_failure() {
        let mut registry = Registry::default();
        let (tx, mut rx) = oneshot::channel::<Delivery<u32>>();
        registry.insert(key("a"), tx, None);

        let entry = registry.remove(&key("a")).unwrap();
        entry.complete(Posted::Value(Box::new("text")), "[a]");
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(OperationError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_remove_live_checks_generation() {
        let mut registry = Registry::default();
        let (tx, _rx) = oneshot::channel::<Delivery<u32>>();
        let generation = registry.insert(key("a"), tx, None);

        assert!(registry.remove_live(&key("a"), generation + 1).is_none());
        assert!(registry.remove_live(&key("a"), generation).is_some());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_abandoned_when_receivers_dropped() {
        let mut registry = Registry::default();
        let (tx, rx) = oneshot::channel::<Delivery<u32>>();
        registry.insert(key("a"), tx, None);

        assert!(!registry.get_mut(&key("a")).unwrap().is_abandoned());
        drop(rx);
        assert!(registry.get_mut(&key("a")).unwrap().is_abandoned());
    }
}
