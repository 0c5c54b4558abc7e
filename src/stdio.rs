//! One-shot stdio transport.
//!
//! `exec` reads one `{code, input_data}` JSON document from the reader and
//! writes one `ExecutionResult` line to the writer. This is also the protocol
//! of the child-process worker.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::sandbox::request::NO_CODE;
use crate::sandbox::{ExecutionError, ExecutionResult, Sandbox, ValidationResult};
use crate::types::Result;

/// Execute the request read from `reader`; the result is also returned.
pub async fn exec<R, W>(sandbox: &Sandbox, reader: &mut R, writer: &mut W) -> Result<ExecutionResult>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw).await?;

    let result = match serde_json::from_slice::<serde_json::Value>(&raw) {
        Ok(body) => sandbox.execute_json(&body).await,
        Err(e) => ExecutionResult::rejected(ExecutionError::missing_input(format!(
            "request is not valid JSON: {}",
            e
        ))),
    };
    write_line(writer, &serde_json::to_vec(&result)?).await?;
    Ok(result)
}

/// Validate raw script source read from `reader`.
pub async fn validate<R, W>(sandbox: &Sandbox, reader: &mut R, writer: &mut W) -> Result<ValidationResult>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut code = String::new();
    reader.read_to_string(&mut code).await?;

    let result = if code.trim().is_empty() {
        ValidationResult::invalid(None, NO_CODE)
    } else {
        sandbox.validate(&code)
    };
    write_line(writer, &serde_json::to_vec(&result)?).await?;
    Ok(result)
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{Bindings, ErrorKind};
    use crate::types::ExecutionLimits;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sandbox() -> Sandbox {
        Sandbox::new(Bindings::standard(), ExecutionLimits::default())
    }

    #[tokio::test]
    async fn test_exec_writes_one_result_line() {
        let mut input: &[u8] = br#"{"code": "print(len(input_data))", "input_data": [{"a": 1}]}"#;
        let mut out = Vec::new();
        let result = exec(&sandbox(), &mut input, &mut out).await.unwrap();
        assert!(result.success);

        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with('\n'));
        let parsed: ExecutionResult = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(parsed.output_data, json!([{"a": 1}]));
        assert_eq!(parsed.stdout, "1\n");
    }

    #[tokio::test]
    async fn test_exec_invalid_json() {
        let mut input: &[u8] = b"not json";
        let mut out = Vec::new();
        let result = exec(&sandbox(), &mut input, &mut out).await.unwrap();
        assert_eq!(result.error_kind(), Some(ErrorKind::MissingInput));
    }

    #[tokio::test]
    async fn test_validate_source() {
        let mut input: &[u8] = b"for x in range(3):\n    print(x)\n";
        let mut out = Vec::new();
        assert!(validate(&sandbox(), &mut input, &mut out).await.unwrap().valid);

        let mut input: &[u8] = b"   ";
        let mut out = Vec::new();
        let result = validate(&sandbox(), &mut input, &mut out).await.unwrap();
        assert_eq!(result, ValidationResult::invalid(None, NO_CODE));
    }
}
