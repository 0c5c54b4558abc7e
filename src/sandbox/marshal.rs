//! Result marshalling: the one place an execution outcome becomes the
//! external `ExecutionResult` / `ValidationResult` contract.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::capture::Captured;
use crate::script::{Fault, JsonError, ParseError};

/// Closed set of failure tags. Callers branch on these, never on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    MissingInput,
    SyntaxError,
    CapabilityViolation,
    RuntimeError,
    ResourceExceeded,
    SerializationError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingInput => "MissingInput",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::CapabilityViolation => "CapabilityViolation",
            ErrorKind::RuntimeError => "RuntimeError",
            ErrorKind::ResourceExceeded => "ResourceExceeded",
            ErrorKind::SerializationError => "SerializationError",
            ErrorKind::InternalError => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn missing_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingInput, message)
    }

    pub fn timed_out() -> Self {
        Self::new(ErrorKind::ResourceExceeded, TIMEOUT_MESSAGE)
    }
}

pub const TIMEOUT_MESSAGE: &str = "execution timed out";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output_data: Json,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<ExecutionError>,
}

impl ExecutionResult {
    /// A failure that never reached the worker; nothing was captured.
    pub fn rejected(error: ExecutionError) -> Self {
        Self {
            success: false,
            output_data: Json::Null,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// 1-indexed line of the diagnostic; absent when no source was given.
    pub line: Option<usize>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub error: Option<ValidationError>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    pub fn invalid(line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(ValidationError {
                line,
                message: message.into(),
            }),
        }
    }
}

impl From<&ParseError> for ValidationResult {
    fn from(err: &ParseError) -> Self {
        Self::invalid(Some(err.line), err.message.clone())
    }
}

// =============================================================================
// Outcome → result
// =============================================================================

/// Internal outcome of one execution, before marshalling.
#[derive(Debug)]
pub enum Outcome {
    /// Script finished; `output_data` already converted to JSON.
    Completed(Json),
    /// Script finished but `output_data` has no JSON form.
    Unserializable(JsonError),
    /// Script text did not parse.
    Syntax(ParseError),
    /// Script-attributable fault or watchdog/limit stop.
    Faulted(Fault),
    /// Watchdog expired before the worker reported.
    TimedOut,
    /// Sandbox defect.
    Internal(String),
}

/// Map an outcome and whatever was captured into the response contract.
pub fn marshal(outcome: Outcome, captured: Captured) -> ExecutionResult {
    let (output_data, error) = match outcome {
        Outcome::Completed(output) => (output, None),
        Outcome::Unserializable(err) => (
            Json::Null,
            Some(ExecutionError::new(
                ErrorKind::SerializationError,
                format!("output_data could not be serialized: {}", err),
            )),
        ),
        Outcome::Syntax(err) => (
            Json::Null,
            Some(
                ExecutionError::new(ErrorKind::SyntaxError, err.message.clone())
                    .with_detail(err.to_string()),
            ),
        ),
        Outcome::Faulted(fault) => (Json::Null, Some(fault_error(fault))),
        Outcome::TimedOut => (Json::Null, Some(ExecutionError::timed_out())),
        Outcome::Internal(message) => (
            Json::Null,
            Some(ExecutionError::new(ErrorKind::InternalError, message)),
        ),
    };
    ExecutionResult {
        success: error.is_none(),
        output_data,
        stdout: captured.stdout,
        stderr: captured.stderr,
        error,
    }
}

fn fault_error(fault: Fault) -> ExecutionError {
    match fault {
        Fault::Runtime(runtime) => ExecutionError::new(ErrorKind::RuntimeError, runtime.headline())
            .with_detail(runtime.traceback()),
        Fault::Capability(name) => ExecutionError::new(
            ErrorKind::CapabilityViolation,
            format!("{} is not permitted", name),
        ),
        Fault::Interrupted => ExecutionError::timed_out(),
        Fault::LimitExceeded(message) => ExecutionError::new(ErrorKind::ResourceExceeded, message),
        Fault::Internal(message) => ExecutionError::new(ErrorKind::InternalError, message),
    }
}
