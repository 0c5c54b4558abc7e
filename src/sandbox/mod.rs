//! Execution service: capability policy, per-call environment, worker
//! dispatch and result marshalling.
//!
//! ```text
//!   transport ─► Sandbox::execute ─► worker slot ─► executor (own thread)
//!                     │                                  │
//!                     └──── watchdog (timeout + grace) ──┘
//!                                     │
//!                               marshal ─► ExecutionResult
//! ```

pub mod capture;
pub mod child;
pub mod dispatcher;
pub mod environment;
pub mod executor;
pub mod marshal;
pub mod policy;
pub mod request;
pub mod validator;

pub use capture::{CaptureBuffers, Captured};
pub use dispatcher::{health_payload, HealthReport, Sandbox, SERVICE_NAME};
pub use environment::Bindings;
pub use marshal::{ErrorKind, ExecutionError, ExecutionResult, ValidationError, ValidationResult};
pub use policy::CapabilityPolicy;
pub use request::ExecutionRequest;
