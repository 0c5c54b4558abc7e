//! Per-service IPC handlers.

pub mod sandbox;
