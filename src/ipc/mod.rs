//! TCP+msgpack IPC transport layer.
//!
//! Length-prefixed msgpack framing; every request names a service and a
//! method, and the `sandbox` service exposes `Execute`, `Validate` and
//! `Health`.

pub mod codec;
pub mod handlers;
pub mod router;
pub mod server;

pub use server::IpcServer;
