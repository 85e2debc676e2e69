//! opgate - admission-controlled execution of hardware operations.
//!
//! Schedules operations against a device that can only handle a bounded
//! number of requests at once (typically one), delivers each result to
//! whoever is waiting for it, and guarantees every admission permit comes
//! back whether the operation succeeds, fails, times out or is cancelled.
//!
//! # Modules
//!
//! - [`executor`]: the operation executor, handles and completion API
//! - [`config`]: INI configuration file support
//! - [`logging`]: tracing subscriber setup

pub mod config;
pub mod executor;
pub mod logging;

/// Version of the opgate library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
