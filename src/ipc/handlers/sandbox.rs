//! Sandbox service handler: Execute, Validate, Health.
//!
//! Every script outcome, including a rejected request, is a successful IPC
//! response carrying an `ExecutionResult`; only transport-level problems
//! (unknown method, non-map body) become IPC errors.

use serde_json::Value;

use crate::ipc::router::require_object;
use crate::sandbox::request::{self, NO_CODE};
use crate::sandbox::{Sandbox, ValidationResult};
use crate::types::{Error, Result};

pub async fn handle(sandbox: &Sandbox, method: &str, body: Value) -> Result<Value> {
    match method {
        "Execute" => {
            require_object(&body)?;
            let result = sandbox.execute_json(&body).await;
            Ok(serde_json::to_value(result)?)
        }
        "Validate" => {
            require_object(&body)?;
            let result = match request::validate_code(&body) {
                Ok(code) => sandbox.validate(&code),
                Err(_) => ValidationResult::invalid(None, NO_CODE),
            };
            Ok(serde_json::to_value(result)?)
        }
        "Health" => Ok(serde_json::to_value(sandbox.health())?),
        _ => Err(Error::not_found(format!("Unknown sandbox method: {}", method))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::Bindings;
    use crate::types::ExecutionLimits;
    use serde_json::json;

    fn sandbox() -> Sandbox {
        Sandbox::new(Bindings::standard(), ExecutionLimits::default())
    }

    #[tokio::test]
    async fn test_execute() {
        let body = handle(
            &sandbox(),
            "Execute",
            json!({"code": "output_data = [r['a'] * 2 for r in input_data]", "input_data": [{"a": 2}]}),
        )
        .await
        .unwrap();
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["output_data"], json!([4]));
        assert_eq!(body["error"], Value::Null);
    }

    #[tokio::test]
    async fn test_validate_missing_code() {
        let body = handle(&sandbox(), "Validate", json!({})).await.unwrap();
        assert_eq!(
            body,
            json!({"valid": false, "error": {"line": null, "message": "No code provided"}})
        );
    }

    #[tokio::test]
    async fn test_rejects_non_map_body_and_unknown_method() {
        let err = handle(&sandbox(), "Execute", json!([1])).await.unwrap_err();
        assert_eq!(err.to_ipc_error_code(), "INVALID_ARGUMENT");
        let err = handle(&sandbox(), "Compile", json!({})).await.unwrap_err();
        assert_eq!(err.to_ipc_error_code(), "NOT_FOUND");
    }
}
