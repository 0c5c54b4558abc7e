//! Top-level IPC router: routes by service, delegates to handlers.

use crate::ipc::handlers;
use crate::sandbox::Sandbox;
use crate::types::{Error, Result};
use serde_json::Value;

/// Service name every sandbox method is registered under.
pub const SANDBOX_SERVICE: &str = "sandbox";

/// Route an IPC request to the appropriate service handler.
pub async fn route_request(
    sandbox: &Sandbox,
    service: &str,
    method: &str,
    body: Value,
) -> Result<Value> {
    match service {
        SANDBOX_SERVICE => handlers::sandbox::handle(sandbox, method, body).await,
        _ => Err(Error::not_found(format!("Unknown service: {}", service))),
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Request bodies are always maps; anything else is a malformed request.
pub fn require_object(body: &Value) -> Result<()> {
    if body.is_object() {
        Ok(())
    } else {
        Err(Error::missing_input("Request body must be a map"))
    }
}
