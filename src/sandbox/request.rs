//! Request decoding shared by every transport.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::marshal::ExecutionError;

pub const NO_CODE: &str = "No code provided";

/// One accepted execution request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    /// Ordered row mappings; `[]` when the caller sent none.
    #[serde(default = "empty_rows")]
    pub input_data: Json,
}

fn empty_rows() -> Json {
    Json::Array(Vec::new())
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, input_data: Json) -> Self {
        Self {
            code: code.into(),
            input_data,
        }
    }

    /// Decode `{code, input_data}`. Missing or empty `code` and a non-list
    /// `input_data` are `MissingInput`; nothing here touches the sandbox.
    pub fn from_json(body: &Json) -> Result<Self, ExecutionError> {
        let code = code_field(body)?;
        let input_data = match body.get("input_data") {
            None | Some(Json::Null) => empty_rows(),
            Some(rows @ Json::Array(_)) => rows.clone(),
            Some(_) => {
                return Err(ExecutionError::missing_input(
                    "input_data must be a list of row objects",
                ))
            }
        };
        Ok(Self { code, input_data })
    }
}

/// Decode `{code}` for a validate-only call.
pub fn validate_code(body: &Json) -> Result<String, ExecutionError> {
    code_field(body)
}

fn code_field(body: &Json) -> Result<String, ExecutionError> {
    match body.get("code") {
        Some(Json::String(code)) if !code.trim().is_empty() => Ok(code.clone()),
        Some(Json::String(_)) | Some(Json::Null) | None => {
            Err(ExecutionError::missing_input(NO_CODE))
        }
        Some(_) => Err(ExecutionError::missing_input("code must be a string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::marshal::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_defaults_input_to_empty_list() {
        let request = ExecutionRequest::from_json(&json!({"code": "x = 1"})).unwrap();
        assert_eq!(request.input_data, json!([]));
        let request =
            ExecutionRequest::from_json(&json!({"code": "x = 1", "input_data": null})).unwrap();
        assert_eq!(request.input_data, json!([]));
    }

    #[test]
    fn test_missing_or_empty_code() {
        for body in [json!({}), json!({"code": ""}), json!({"code": "  \n"}), json!({"code": 5})] {
            let err = ExecutionRequest::from_json(&body).unwrap_err();
            assert_eq!(err.kind, ErrorKind::MissingInput);
        }
        assert_eq!(
            ExecutionRequest::from_json(&json!({})).unwrap_err().message,
            NO_CODE
        );
    }

    #[test]
    fn test_input_must_be_a_list() {
        let err = ExecutionRequest::from_json(&json!({"code": "x = 1", "input_data": {"a": 1}}))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingInput);
    }

    #[test]
    fn test_serde_default_matches_from_json() {
        let request: ExecutionRequest = serde_json::from_value(json!({"code": "x = 1"})).unwrap();
        assert_eq!(request.input_data, json!([]));
    }
}
