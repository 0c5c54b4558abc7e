//! HTTP transport (axum).
//!
//! - `POST /api/custom-code/execute`  → `ExecutionResult`
//! - `POST /api/custom-code/validate` → `ValidationResult`
//! - `GET  /health`                   → static liveness payload
//!
//! Script outcomes are always `200`; only requests the sandbox refused to run
//! (malformed body, missing code) answer `4xx`, still with a result body.

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::sandbox::request::{self, NO_CODE};
use crate::sandbox::{
    health_payload, ErrorKind, ExecutionError, ExecutionResult, Sandbox, ValidationResult,
};
use crate::types::HttpConfig;

pub const EXECUTE_PATH: &str = "/api/custom-code/execute";
pub const VALIDATE_PATH: &str = "/api/custom-code/validate";
pub const HEALTH_PATH: &str = "/health";

/// Build the router over a shared sandbox.
pub fn router(sandbox: Sandbox, config: &HttpConfig) -> Router {
    Router::new()
        .route(EXECUTE_PATH, post(execute))
        .route(VALIDATE_PATH, post(validate))
        .route(HEALTH_PATH, get(health))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .with_state(sandbox)
}

/// Serve until `cancel` fires, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    sandbox: Sandbox,
    config: &HttpConfig,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    tracing::info!("http_listening: addr={}", listener.local_addr()?);
    axum::serve(listener, router(sandbox, config))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn execute(
    State(sandbox): State<Sandbox>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return rejected(rejection),
    };
    match request::ExecutionRequest::from_json(&body) {
        Ok(request) => Json(sandbox.execute(request).await).into_response(),
        Err(error) => {
            (StatusCode::BAD_REQUEST, Json(ExecutionResult::rejected(error))).into_response()
        }
    }
}

async fn validate(
    State(sandbox): State<Sandbox>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let code = match body {
        Ok(Json(body)) => request::validate_code(&body).ok(),
        Err(_) => None,
    };
    match code {
        Some(code) => Json(sandbox.validate(&code)).into_response(),
        None => (
            StatusCode::BAD_REQUEST,
            Json(ValidationResult::invalid(None, NO_CODE)),
        )
            .into_response(),
    }
}

async fn health() -> Json<Value> {
    Json(health_payload())
}

fn rejected(rejection: JsonRejection) -> Response {
    let (status, error) = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            ExecutionError::new(ErrorKind::ResourceExceeded, rejection.body_text()),
        )
    } else {
        (
            StatusCode::BAD_REQUEST,
            ExecutionError::missing_input(format!("invalid request body: {}", rejection.body_text())),
        )
    };
    (status, Json(ExecutionResult::rejected(error))).into_response()
}
