//! # Code Sandbox - Untrusted-Script Execution Service
//!
//! Runs short user-supplied data-transformation scripts against tabular input
//! and returns a structured result:
//! - Capability policy: whitelisted builtins and library imports only
//! - Watchdog-bounded interpreter on a dedicated worker per execution
//! - Bounded stdout/stderr capture
//! - One result contract (`ExecutionResult`) across IPC, HTTP and stdio
//!
//! ## Architecture
//!
//! ```text
//!   IPC (msgpack/TCP) ─┐
//!   HTTP (axum)       ─┼─► Sandbox ─► worker slot ─► Interpreter + Library
//!   stdio (one-shot)  ─┘       │                          │
//!                              └──── watchdog ────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod http;
pub mod ipc;
pub mod sandbox;
pub mod script;
pub mod stdio;
pub mod types;

pub mod observability;

pub use sandbox::{ExecutionRequest, ExecutionResult, Sandbox, ValidationResult};
pub use types::{Config, Error, Result};
