//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context. These are service-level errors; faults
//! raised by a script never surface here, they are marshalled into an
//! `ExecutionResult` by the sandbox.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the sandbox service.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or absent request fields (IPC INVALID_ARGUMENT).
    #[error("missing input: {0}")]
    MissingInput(String),

    /// Resource not found (unknown service or method).
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Convert to the IPC wire error code.
    pub fn to_ipc_error_code(&self) -> &'static str {
        match self {
            Error::MissingInput(_) => "INVALID_ARGUMENT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Config(_) => "FAILED_PRECONDITION",
            Error::Serialization(_) | Error::Io(_) => "INTERNAL",
        }
    }
}

// Convenience constructors
impl Error {
    pub fn missing_input(msg: impl Into<String>) -> Self {
        Self::MissingInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipc_error_codes() {
        assert_eq!(Error::missing_input("code").to_ipc_error_code(), "INVALID_ARGUMENT");
        assert_eq!(Error::not_found("svc").to_ipc_error_code(), "NOT_FOUND");
        assert_eq!(Error::config("timeout").to_ipc_error_code(), "FAILED_PRECONDITION");
        let io = Error::from(std::io::Error::other("closed"));
        assert_eq!(io.to_ipc_error_code(), "INTERNAL");
    }
}
