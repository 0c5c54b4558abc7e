//! Core types for the sandbox service.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (ExecutionId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for server, limits, and transports

mod config;
mod errors;
mod ids;

pub use config::{Config, ExecutionLimits, ExecutionMode, HttpConfig, IpcConfig, ObservabilityConfig, ServerConfig};
pub use errors::{Error, Result};
pub use ids::ExecutionId;
