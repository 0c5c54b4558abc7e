//! Faults raised while a script runs.
//!
//! `Fault` never leaves the sandbox: the result marshaller maps every variant
//! onto an `ExecutionError` kind.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct TraceFrame {
    pub function: String,
    pub line: usize,
}

/// A script-level exception such as `ZeroDivisionError`.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeFault {
    pub type_name: &'static str,
    pub message: String,
    /// Innermost frame first.
    pub frames: Vec<TraceFrame>,
}

impl RuntimeFault {
    pub fn new(type_name: &'static str, message: impl Into<String>) -> Self {
        Self {
            type_name,
            message: message.into(),
            frames: Vec::new(),
        }
    }

    /// `"<Type>: <text>"`, or just the type when there is no text.
    pub fn headline(&self) -> String {
        if self.message.is_empty() {
            self.type_name.to_string()
        } else {
            format!("{}: {}", self.type_name, self.message)
        }
    }

    /// Python-style traceback, innermost call last.
    pub fn traceback(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in self.frames.iter().rev() {
            out.push_str(&format!("  line {}, in {}\n", frame.line, frame.function));
        }
        out.push_str(&self.headline());
        out
    }
}

impl fmt::Display for RuntimeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.headline())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Fault {
    #[error("{0}")]
    Runtime(RuntimeFault),

    /// Resolution of a name, attribute or import the policy refuses.
    #[error("{0} is not permitted")]
    Capability(String),

    /// The watchdog tripped the interrupt flag.
    #[error("execution interrupted")]
    Interrupted,

    #[error("{0}")]
    LimitExceeded(String),

    /// Interpreter invariant broken; never the script's fault.
    #[error("internal interpreter error: {0}")]
    Internal(String),
}

impl Fault {
    pub fn runtime(type_name: &'static str, message: impl Into<String>) -> Self {
        Self::Runtime(RuntimeFault::new(type_name, message))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::runtime("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::runtime("ValueError", message)
    }

    pub fn name_error(name: &str) -> Self {
        Self::runtime("NameError", format!("name '{}' is not defined", name))
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::runtime("IndexError", message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::runtime("KeyError", message)
    }

    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::runtime("AttributeError", message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::runtime("ZeroDivisionError", message)
    }

    pub fn overflow(message: impl Into<String>) -> Self {
        Self::runtime("OverflowError", message)
    }

    pub fn capability(name: impl Into<String>) -> Self {
        Self::Capability(name.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Only script exceptions are visible to `try`/`except`.
    pub fn is_catchable(&self) -> bool {
        matches!(self, Fault::Runtime(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traceback_innermost_last() {
        let mut fault = RuntimeFault::new("ZeroDivisionError", "division by zero");
        fault.frames.push(TraceFrame {
            function: "f".into(),
            line: 2,
        });
        fault.frames.push(TraceFrame {
            function: "<module>".into(),
            line: 4,
        });
        let text = fault.traceback();
        let module_at = text.find("in <module>").unwrap();
        let f_at = text.find("in f").unwrap();
        assert!(module_at < f_at);
        assert!(text.ends_with("ZeroDivisionError: division by zero"));
    }

    #[test]
    fn test_capability_display() {
        assert_eq!(Fault::capability("open").to_string(), "open is not permitted");
    }

    #[test]
    fn test_only_runtime_faults_are_catchable() {
        assert!(Fault::type_error("x").is_catchable());
        assert!(!Fault::capability("os").is_catchable());
        assert!(!Fault::Interrupted.is_catchable());
        assert!(!Fault::LimitExceeded("big".into()).is_catchable());
    }
}
