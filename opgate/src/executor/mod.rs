//! Operation Executor
//!
//! This module provides an admission-controlled executor for hardware-bound
//! operations such as commands to a half-duplex radio. At most N operations
//! run at once, callers wait for results with or without a deadline, equal
//! in-flight operations are shared, and any operation can be cancelled
//! without leaking permits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    OperationExecutor                         │
//! │  schedule / execute / wait_for / get_result                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │ Admission   │  │ Result      │  │ Status              │  │
//! │  │ Gate        │  │ Registry    │  │ Describer           │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!          ▲                                   ▲
//!          │ get / cancel                      │ notify_* / Completion
//!   OperationHandle                          driver
//! ```
//!
//! # Core Concepts
//!
//! - **Operation**: identity ([`OperationKey`]) plus an execution body and an
//!   optional cancel hook. Asynchronous bodies start I/O and report back via
//!   a [`Completion`]; synchronous bodies return the result directly.
//!
//! - **Admission permit**: one unit of the concurrency budget, held from the
//!   moment a body starts until its result is posted. Scheduling is not
//!   limited; if no permit is free at schedule time, the first handle that
//!   waits acquires one.
//!
//! - **Handle**: yields the result at most once, supports timeouts and
//!   cancellation. Cancelling posts [`OperationError::Cancelled`] through
//!   the normal completion path.
//!
//! # Example
//!
//! ```ignore
//! use opgate::executor::{ExecutorConfig, Operation, OperationExecutor, OperationKey};
//!
//! let executor = OperationExecutor::new(ExecutorConfig::new(1));
//!
//! let op = Operation::asynchronous(OperationKey::new("read").with(0x2a19u16), |completion| {
//!     radio.read(0x2a19, move |status, value| completion.status(status, value));
//!     Ok(())
//! });
//!
//! let battery: Vec<u8> = executor
//!     .execute_nonnull_timeout(op, Duration::from_secs(2))
//!     .await?;
//! ```
//!
//! # Timeouts
//!
//! A timeout means the peripheral's state is unknown: the operation may
//! still complete later. `get_result` cancels the operation on timeout and
//! returns a late result instead if one raced the deadline. Callers should
//! treat a surviving timeout as a reason to reset the connection.

mod admission;
mod config;
mod core;
mod error;
mod handle;
mod operation;
mod registry;
mod status;

// Configuration
pub use config::{ExecutorConfig, DEFAULT_MAX_CONCURRENT_OPERATIONS, DEFAULT_SUCCESS_STATUS};

// Executor
pub use self::core::{ExecutorStats, OperationExecutor};

// Operations
pub use operation::{Completion, KeyElement, Operation, OperationKey};

// Handles
pub use handle::{HandleState, OperationHandle};

// Admission
pub use admission::{AdmissionGate, AdmissionPermit};

// Errors
pub use error::{ExecutorError, OperationError};

// Status descriptions
pub use status::{GenericStatusDescriber, StatusDescriber};
