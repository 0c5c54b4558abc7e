//! Child-process isolation: one `<program> exec` process per execution.
//!
//! The child reads one request from stdin and writes one result to stdout
//! (see [`crate::stdio`]). It receives the parent's full [`ExecutionLimits`]
//! through `SANDBOX_LIMITS`. The parent enforces its own deadline on top of
//! the child's watchdog and kills the process when it is exceeded.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::capture::Captured;
use super::marshal::{marshal, ExecutionResult, Outcome};
use super::request::ExecutionRequest;
use crate::types::ExecutionLimits;

pub async fn execute(
    program: &Path,
    request: &ExecutionRequest,
    limits: &ExecutionLimits,
) -> ExecutionResult {
    match run(program, request, limits).await {
        Ok(result) => result,
        Err(outcome) => marshal(outcome, Captured::default()),
    }
}

async fn run(
    program: &Path,
    request: &ExecutionRequest,
    limits: &ExecutionLimits,
) -> Result<ExecutionResult, Outcome> {
    let payload = serde_json::to_vec(request)
        .map_err(|e| Outcome::Internal(format!("failed to encode request: {}", e)))?;

    let child_limits = ExecutionLimits {
        max_concurrent: 1,
        ..limits.clone()
    };
    let encoded_limits = serde_json::to_string(&child_limits)
        .map_err(|e| Outcome::Internal(format!("failed to encode limits: {}", e)))?;
    let mut child = Command::new(program)
        .arg("exec")
        .env_clear()
        .env("SANDBOX_LIMITS", encoded_limits)
        .env("SANDBOX_EXECUTION_MODE", "in_process")
        .env("RUST_LOG", "error")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            Outcome::Internal(format!("failed to spawn {}: {}", program.display(), e))
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(&payload)
            .await
            .map_err(|e| Outcome::Internal(format!("failed to write request: {}", e)))?;
        // Closing stdin marks the end of the request.
        drop(stdin);
    }

    // The child runs its own watchdog; this deadline only catches a child
    // that cannot stop itself.
    let deadline = limits.timeout + limits.grace_period * 2;
    let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(Outcome::Internal(format!("failed to wait for worker: {}", e))),
        Err(_) => {
            tracing::warn!("child_worker_killed: deadline={:?}", deadline);
            return Err(Outcome::TimedOut);
        }
    };

    serde_json::from_slice::<ExecutionResult>(&output.stdout).map_err(|e| {
        Outcome::Internal(format!(
            "worker exited with {} and no readable result: {}",
            output.status, e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::marshal::ErrorKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_program_is_internal() {
        let result = execute(
            Path::new("/nonexistent/sandboxd"),
            &ExecutionRequest::new("x = 1", json!([])),
            &ExecutionLimits::default(),
        )
        .await;
        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::InternalError));
    }
}
