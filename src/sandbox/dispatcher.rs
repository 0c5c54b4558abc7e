//! Dispatcher: worker slots, the watchdog, and resource reclamation.
//!
//! Every transport funnels into [`Sandbox::execute`]. One execution holds one
//! worker slot from admission until its worker has actually stopped, so a
//! runaway script can reduce capacity but never leak it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::Instrument;

use super::capture::{CaptureBuffers, Captured};
use super::child;
use super::environment::Bindings;
use super::executor;
use super::marshal::{marshal, ErrorKind, ExecutionError, ExecutionResult, Outcome, ValidationResult};
use super::request::ExecutionRequest;
use super::validator;
use crate::script::Interrupt;
use crate::types::{Config, ExecutionId, ExecutionLimits, ExecutionMode};

/// Name reported by the health check.
pub const SERVICE_NAME: &str = "custom-code-executor";

/// Stack reserved for each worker thread. Deeply nested scripts recurse in
/// the parser and interpreter.
const WORKER_STACK_BYTES: usize = 32 * 1024 * 1024;

/// Log target for sandbox defects, kept apart from per-request logging.
pub const INTERNAL_LOG_TARGET: &str = "sandbox::internal";

#[derive(Debug)]
struct Stats {
    started_at: DateTime<Utc>,
    in_flight: AtomicUsize,
    completed: AtomicU64,
    internal_errors: AtomicU64,
}

#[derive(Debug)]
struct Inner {
    bindings: Bindings,
    limits: ExecutionLimits,
    mode: ExecutionMode,
    worker_program: Option<PathBuf>,
    slots: Arc<Semaphore>,
    stats: Stats,
}

/// Liveness and counters, as returned by the IPC `Health` method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub service: String,
    pub mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    pub in_flight: usize,
    pub available_slots: usize,
    pub completed: u64,
    pub internal_errors: u64,
}

/// Static liveness payload for the HTTP health check.
pub fn health_payload() -> Json {
    serde_json::json!({ "status": "healthy", "service": SERVICE_NAME })
}

/// Cloneable handle to the execution service.
#[derive(Debug, Clone)]
pub struct Sandbox {
    inner: Arc<Inner>,
}

impl Sandbox {
    /// In-process sandbox with the given bindings and limits.
    pub fn new(bindings: Bindings, limits: ExecutionLimits) -> Self {
        Self::build(bindings, limits, ExecutionMode::InProcess, None)
    }

    pub fn from_config(config: &Config) -> Self {
        Self::build(
            Bindings::standard(),
            config.limits.clone(),
            config.server.execution_mode,
            config.server.worker_program.clone(),
        )
    }

    /// Run each execution in a `<program> exec` child process instead.
    pub fn with_child_process(bindings: Bindings, limits: ExecutionLimits, program: PathBuf) -> Self {
        Self::build(bindings, limits, ExecutionMode::ChildProcess, Some(program))
    }

    fn build(
        bindings: Bindings,
        limits: ExecutionLimits,
        mode: ExecutionMode,
        worker_program: Option<PathBuf>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(limits.max_concurrent.max(1)));
        Self {
            inner: Arc::new(Inner {
                bindings,
                limits,
                mode,
                worker_program,
                slots,
                stats: Stats {
                    started_at: Utc::now(),
                    in_flight: AtomicUsize::new(0),
                    completed: AtomicU64::new(0),
                    internal_errors: AtomicU64::new(0),
                },
            }),
        }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.inner.limits
    }

    pub fn mode(&self) -> ExecutionMode {
        self.inner.mode
    }

    // ===== Operations =====

    /// Decode a `{code, input_data}` body and execute it.
    pub async fn execute_json(&self, body: &Json) -> ExecutionResult {
        match ExecutionRequest::from_json(body) {
            Ok(request) => self.execute(request).await,
            Err(error) => ExecutionResult::rejected(error),
        }
    }

    /// Execute one request. Always yields exactly one result.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let id = ExecutionId::new();
        let span = tracing::info_span!("execution", execution_id = %id);
        self.run(request).instrument(span).await
    }

    /// Syntax check only; never runs the script and needs no worker slot.
    pub fn validate(&self, code: &str) -> ValidationResult {
        validator::validate(code)
    }

    pub fn health(&self) -> HealthReport {
        let stats = &self.inner.stats;
        HealthReport {
            status: "healthy".to_string(),
            service: SERVICE_NAME.to_string(),
            mode: self.inner.mode,
            started_at: stats.started_at,
            in_flight: stats.in_flight.load(Ordering::Relaxed),
            available_slots: self.inner.slots.available_permits(),
            completed: stats.completed.load(Ordering::Relaxed),
            internal_errors: stats.internal_errors.load(Ordering::Relaxed),
        }
    }

    // ===== Internals =====

    async fn run(&self, request: ExecutionRequest) -> ExecutionResult {
        if request.code.trim().is_empty() {
            return ExecutionResult::rejected(ExecutionError::missing_input(
                super::request::NO_CODE,
            ));
        }
        let limit = self.inner.limits.max_code_bytes;
        if request.code.len() > limit {
            return ExecutionResult::rejected(ExecutionError::new(
                ErrorKind::ResourceExceeded,
                format!("script is {} bytes; the limit is {} bytes", request.code.len(), limit),
            ));
        }

        let permit = match self.inner.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return self.finish(
                    marshal(
                        Outcome::Internal("worker slots are closed".into()),
                        Captured::default(),
                    ),
                    Instant::now(),
                )
            }
        };

        let started = Instant::now();
        self.inner.stats.in_flight.fetch_add(1, Ordering::Relaxed);
        let result = match self.inner.mode {
            ExecutionMode::InProcess => self.run_in_thread(request, permit).await,
            ExecutionMode::ChildProcess => {
                let result = self.run_in_child(&request).await;
                drop(permit);
                result
            }
        };
        self.inner.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.finish(result, started)
    }

    fn finish(&self, result: ExecutionResult, started: Instant) -> ExecutionResult {
        let stats = &self.inner.stats;
        stats.completed.fetch_add(1, Ordering::Relaxed);
        let elapsed_ms = started.elapsed().as_millis();
        match &result.error {
            None => tracing::info!("execution_succeeded: elapsed_ms={}", elapsed_ms),
            Some(error) if error.kind == ErrorKind::InternalError => {
                stats.internal_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    target: INTERNAL_LOG_TARGET,
                    "sandbox_internal_error: message={}, elapsed_ms={}",
                    error.message,
                    elapsed_ms
                );
            }
            Some(error) => tracing::info!(
                "execution_failed: kind={}, elapsed_ms={}",
                error.kind,
                elapsed_ms
            ),
        }
        result
    }

    /// Dedicated OS thread with its own interpreter. The watchdog trips the
    /// interrupt flag at the deadline, then waits out the grace period.
    async fn run_in_thread(
        &self,
        request: ExecutionRequest,
        permit: OwnedSemaphorePermit,
    ) -> ExecutionResult {
        let limits = self.inner.limits.clone();
        let capture = Arc::new(CaptureBuffers::new(
            limits.max_output_bytes,
            limits.output_overflow_fatal,
        ));
        let interrupt = Interrupt::new();
        let (tx, mut rx) = oneshot::channel();

        let worker = {
            let bindings = self.inner.bindings.clone();
            let capture = capture.clone();
            let interrupt = interrupt.clone();
            let limits = limits.clone();
            move || {
                let outcome = executor::execute(&request, &bindings, &limits, capture, interrupt);
                // The slot is released only once the script has stopped.
                drop(permit);
                let _ = tx.send(outcome);
            }
        };
        let spawned = thread::Builder::new()
            .name("sandbox-worker".to_string())
            .stack_size(WORKER_STACK_BYTES)
            .spawn(worker);
        if let Err(err) = spawned {
            return marshal(
                Outcome::Internal(format!("failed to spawn worker thread: {}", err)),
                Captured::default(),
            );
        }

        let outcome = match tokio::time::timeout(limits.timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Outcome::Internal("worker exited without reporting an outcome".into()),
            Err(_) => {
                interrupt.trigger();
                match tokio::time::timeout(limits.grace_period, rx).await {
                    Ok(_) => tracing::debug!("worker_stopped_after_interrupt"),
                    Err(_) => tracing::warn!(
                        "worker_unresponsive: grace_period={:?}, slot held until it stops",
                        limits.grace_period
                    ),
                }
                Outcome::TimedOut
            }
        };
        marshal(outcome, capture.snapshot())
    }

    async fn run_in_child(&self, request: &ExecutionRequest) -> ExecutionResult {
        let program = match self
            .inner
            .worker_program
            .clone()
            .or_else(|| std::env::current_exe().ok())
        {
            Some(program) => program,
            None => {
                return marshal(
                    Outcome::Internal("no worker program configured".into()),
                    Captured::default(),
                )
            }
        };
        child::execute(&program, request, &self.inner.limits).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn sandbox_with(limits: ExecutionLimits) -> Sandbox {
        Sandbox::new(Bindings::standard(), limits)
    }

    fn sandbox() -> Sandbox {
        sandbox_with(ExecutionLimits::default())
    }

    #[tokio::test]
    async fn test_sets_output_data() {
        let result = sandbox()
            .execute(ExecutionRequest::new("output_data = [{'x': 1}]", json!([])))
            .await;
        assert!(result.success);
        assert_eq!(result.output_data, json!([{"x": 1}]));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_division_by_zero() {
        let result = sandbox()
            .execute(ExecutionRequest::new("x = 1 / 0", json!([{"a": 1}])))
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeError));
        assert_eq!(result.output_data, Json::Null);
    }

    #[tokio::test]
    async fn test_timeout_then_recovery() {
        let limits = ExecutionLimits {
            timeout: Duration::from_millis(200),
            grace_period: Duration::from_millis(500),
            max_concurrent: 1,
            ..ExecutionLimits::default()
        };
        let sandbox = sandbox_with(limits);

        let started = Instant::now();
        let result = sandbox
            .execute(ExecutionRequest::new("print('start')\nwhile True:\n    pass", json!([])))
            .await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.error_kind(), Some(ErrorKind::ResourceExceeded));
        assert_eq!(result.error.unwrap().message, "execution timed out");
        assert_eq!(result.stdout, "start\n");

        // The single slot comes back once the worker stops.
        let next = sandbox
            .execute(ExecutionRequest::new("output_data = 1", json!([])))
            .await;
        assert!(next.success);
        assert_eq!(sandbox.health().available_slots, 1);
    }

    #[tokio::test]
    async fn test_code_size_limit() {
        let limits = ExecutionLimits {
            max_code_bytes: 8,
            ..ExecutionLimits::default()
        };
        let result = sandbox_with(limits)
            .execute(ExecutionRequest::new("output_data = 12345", json!([])))
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::ResourceExceeded));
    }

    #[tokio::test]
    async fn test_missing_code_never_reaches_worker() {
        let sandbox = sandbox();
        let result = sandbox.execute_json(&json!({"input_data": []})).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::MissingInput));
        assert_eq!(sandbox.health().completed, 0);
    }

    #[tokio::test]
    async fn test_fatal_output_overflow() {
        let limits = ExecutionLimits {
            max_output_bytes: 16,
            output_overflow_fatal: true,
            ..ExecutionLimits::default()
        };
        let result = sandbox_with(limits)
            .execute(ExecutionRequest::new("for i in range(100):\n    print(i)", json!([])))
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::ResourceExceeded));
        assert!(result.stdout.contains("[output truncated"));
    }

    #[tokio::test]
    async fn test_health_report() {
        let sandbox = sandbox();
        let report = sandbox.health();
        assert_eq!(report.status, "healthy");
        assert_eq!(report.service, SERVICE_NAME);
        assert_eq!(report.in_flight, 0);
        assert_eq!(health_payload(), json!({"status": "healthy", "service": "custom-code-executor"}));
    }

    #[test]
    fn test_validate_does_not_execute() {
        let result = sandbox().validate("print('hello')");
        assert!(result.valid);
        let result = sandbox().validate("def f(:");
        assert!(!result.valid);
    }
}
