//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`config`] - Configuration management (path, show, init)
//! - [`simulate`] - Run operations against the simulated radio

pub mod config;
pub mod simulate;
