//! Syntax validation without execution.

use super::marshal::ValidationResult;
use crate::script::parse_program;

/// Parse `code` and report the first diagnostic, if any.
///
/// Never executes a statement and touches no shared state, so it is safe to
/// call concurrently with executions.
pub fn validate(code: &str) -> ValidationResult {
    match parse_program(code) {
        Ok(_) => ValidationResult::ok(),
        Err(err) => ValidationResult::from(&err),
    }
}
