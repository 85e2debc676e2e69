//! Operation descriptors.
//!
//! An [`Operation`] is a unit of hardware-bound work identified by an
//! [`OperationKey`]. Two operations with structurally equal keys are the same
//! logical operation: the executor indexes in-flight work by key, and a
//! second schedule of an equal key joins the first instead of running again.
//!
//! # Example
//!
//! ```ignore
//! use opgate::executor::{Operation, OperationKey};
//!
//! let key = OperationKey::new("read_characteristic").with(0x2a37u16);
//!
//! // Asynchronous: start the I/O and report back later through the completion.
//! let read = Operation::asynchronous(key, move |completion| {
//!     radio.start_read(0x2a37, move |status, bytes| completion.status(status, Some(bytes)));
//!     Ok(())
//! });
//!
//! // Synchronous: the result is known as soon as the body returns.
//! let mtu = Operation::synchronous(OperationKey::new("mtu"), || Ok(Some(247u16)));
//! ```

use super::core::OperationExecutor;
use super::error::OperationError;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// One identifying element of an operation key.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum KeyElement {
    /// A textual element such as the operation name or a device address.
    Text(String),
    /// An integer element such as a handle or register number.
    Int(i64),
    /// A raw byte element such as a UUID or payload.
    Bytes(Vec<u8>),
}

impl fmt::Display for KeyElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            Self::Int(n) => write!(f, "{}", n),
            Self::Bytes(bytes) => {
                write!(f, "0x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for KeyElement {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for KeyElement {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&[u8]> for KeyElement {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<Vec<u8>> for KeyElement {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

macro_rules! int_key_element {
    ($($t:ty),*) => {
        $(
            impl From<$t> for KeyElement {
                fn from(n: $t) -> Self {
                    Self::Int(i64::from(n))
                }
            }
        )*
    };
}

int_key_element!(u8, u16, u32, i8, i16, i32, i64);

/// Structural identity of an operation.
///
/// Keys compare and hash by their ordered elements. The display form is the
/// human-readable label used in logs and errors, e.g. `[write, 42, 0x0102]`.
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct OperationKey(Vec<KeyElement>);

impl OperationKey {
    /// Creates a key whose first element is usually the operation name.
    pub fn new(first: impl Into<KeyElement>) -> Self {
        Self(vec![first.into()])
    }

    /// Appends an identifying element.
    pub fn with(mut self, element: impl Into<KeyElement>) -> Self {
        self.0.push(element.into());
        self
    }

    /// Returns the identifying elements in order.
    pub fn elements(&self) -> &[KeyElement] {
        &self.0
    }
}

impl FromIterator<KeyElement> for OperationKey {
    fn from_iter<I: IntoIterator<Item = KeyElement>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, element) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", element)?;
        }
        write!(f, "]")
    }
}

impl fmt::Debug for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationKey{}", self)
    }
}

/// Value or absence posted for a completed operation.
pub(crate) type Delivery<T> = Result<Option<T>, OperationError>;

type RunFn<T> = dyn Fn(Completion<T>) -> Result<(), OperationError> + Send + Sync;
type CallFn<T> = dyn Fn() -> Delivery<T> + Send + Sync;
type CancelFn = dyn Fn() + Send + Sync;

enum Body<T> {
    Asynchronous(Box<RunFn<T>>),
    Synchronous(Box<CallFn<T>>),
}

/// Result of starting an operation's body.
pub(crate) enum Started<T> {
    /// The body kicked off external work; a completion will arrive later.
    Pending,
    /// The body produced its result directly.
    Finished(Delivery<T>),
}

/// A schedulable unit of work.
///
/// Equality and hashing use only the key.
pub struct Operation<T> {
    key: OperationKey,
    body: Body<T>,
    cancel: Option<Box<CancelFn>>,
}

impl<T: Send + 'static> Operation<T> {
    /// Creates an operation whose body starts external asynchronous work.
    ///
    /// The body receives a [`Completion`] which the driver uses to post the
    /// result once the work finishes. Returning an error from the body posts
    /// that error immediately.
    pub fn asynchronous<F>(key: OperationKey, run: F) -> Self
    where
        F: Fn(Completion<T>) -> Result<(), OperationError> + Send + Sync + 'static,
    {
        Self {
            key,
            body: Body::Asynchronous(Box::new(run)),
            cancel: None,
        }
    }

    /// Creates an operation whose body returns the result directly.
    pub fn synchronous<F>(key: OperationKey, call: F) -> Self
    where
        F: Fn() -> Result<Option<T>, OperationError> + Send + Sync + 'static,
    {
        Self {
            key,
            body: Body::Synchronous(Box::new(call)),
            cancel: None,
        }
    }

    /// Sets the best-effort hook run when the operation is cancelled.
    pub fn with_cancel<F>(mut self, cancel: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.cancel = Some(Box::new(cancel));
        self
    }

    /// Runs the body.
    pub(crate) fn start(&self, completion: Completion<T>) -> Started<T> {
        match &self.body {
            Body::Asynchronous(run) => match run(completion) {
                Ok(()) => Started::Pending,
                Err(e) => Started::Finished(Err(e)),
            },
            Body::Synchronous(call) => Started::Finished(call()),
        }
    }

    /// Runs the cancel hook, if any.
    pub(crate) fn cancel(&self) {
        if let Some(cancel) = &self.cancel {
            cancel();
        }
    }
}

impl<T> Operation<T> {
    /// Returns the operation's identity.
    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    /// Returns true if the body reports its result synchronously.
    pub fn is_synchronous(&self) -> bool {
        matches!(self.body, Body::Synchronous(_))
    }
}

impl<T> PartialEq for Operation<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Operation<T> {}

impl<T> Hash for Operation<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<T> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.body {
            Body::Asynchronous(_) => "asynchronous",
            Body::Synchronous(_) => "synchronous",
        };
        f.debug_struct("Operation")
            .field("key", &self.key)
            .field("kind", &kind)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

impl<T> fmt::Display for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Operation {}", self.key)
    }
}

/// Callback token handed to an asynchronous body.
///
/// The driver keeps it until the hardware reports back, then calls exactly
/// one of the completion methods. Later calls, or calls after the operation
/// was cancelled, are dropped by the executor with a warning. Each method
/// returns whether the result reached a waiting entry.
pub struct Completion<T> {
    executor: OperationExecutor,
    key: OperationKey,
    _result: PhantomData<fn(T)>,
}

impl<T: Send + 'static> Completion<T> {
    pub(crate) fn new(executor: OperationExecutor, key: OperationKey) -> Self {
        Self {
            executor,
            key,
            _result: PhantomData,
        }
    }

    /// Returns the key of the operation this completion belongs to.
    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    /// Posts a successful result.
    pub fn success(&self, value: T) -> bool {
        self.executor.notify_success(&self.key, value)
    }

    /// Posts a successful result without a value.
    pub fn success_empty(&self) -> bool {
        self.executor.notify_success_empty(&self.key)
    }

    /// Posts a failure.
    pub fn failure(&self, error: OperationError) -> bool {
        self.executor.notify_failure(&self.key, error)
    }

    /// Posts a raw status code with an optional value.
    pub fn status(&self, status: i32, value: Option<T>) -> bool {
        self.executor.notify_completion(&self.key, status, value)
    }
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            key: self.key.clone(),
            _result: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn hash_of<H: Hash>(value: &H) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_key_structural_equality() {
        let a = OperationKey::new("write").with(42u16).with(vec![1u8, 2]);
        let b = OperationKey::new("write").with(42u16).with(vec![1u8, 2]);
        let c = OperationKey::new("write").with(43u16).with(vec![1u8, 2]);

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_order_matters() {
        let a = OperationKey::new("read").with(1u8).with(2u8);
        let b = OperationKey::new("read").with(2u8).with(1u8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_display() {
        let key = OperationKey::new("write").with(42i32).with(&[0x01u8, 0xab][..]);
        assert_eq!(key.to_string(), "[write, 42, 0x01ab]");
        assert_eq!(format!("{:?}", key), "OperationKey[write, 42, 0x01ab]");
    }

    #[test]
    fn test_key_from_iterator() {
        let key: OperationKey = vec![KeyElement::from("scan"), KeyElement::from(7u32)]
            .into_iter()
            .collect();
        assert_eq!(key, OperationKey::new("scan").with(7u32));
        assert_eq!(key.elements().len(), 2);
    }

    #[test]
    fn test_operation_equality_uses_key_only() {
        let a: Operation<u32> = Operation::synchronous(OperationKey::new("mtu"), || Ok(Some(1)));
        let b: Operation<u32> = Operation::synchronous(OperationKey::new("mtu"), || Ok(Some(2)));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a.to_string(), "Operation [mtu]");
    }

    #[test]
    fn test_cancel_hook_defaults_to_noop() {
        let op: Operation<()> = Operation::synchronous(OperationKey::new("noop"), || Ok(None));
        op.cancel();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let op: Operation<()> = Operation::synchronous(OperationKey::new("noop"), || Ok(None))
            .with_cancel(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        op.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_operation_debug_reports_kind() {
        let op: Operation<u8> = Operation::synchronous(OperationKey::new("mtu"), || Ok(None));
        let debug = format!("{:?}", op);
        assert!(debug.contains("synchronous"));
        assert!(op.is_synchronous());
    }
}
