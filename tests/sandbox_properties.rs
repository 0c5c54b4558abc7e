//! Dispatcher-level properties: echo, containment, timeouts, isolation.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use code_sandbox::sandbox::{Bindings, ErrorKind, ExecutionRequest, Sandbox};
use code_sandbox::types::ExecutionLimits;
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use tracing_test::traced_test;

fn sandbox() -> Sandbox {
    Sandbox::new(Bindings::standard(), ExecutionLimits::default())
}

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        (-1.0e9f64..1.0e9).prop_map(Value::from),
        "[a-zA-Z0-9 _-]{0,12}".prop_map(Value::String),
    ]
}

fn rows() -> impl Strategy<Value = Value> {
    proptest::collection::vec(
        proptest::collection::btree_map("[a-z]{1,6}", leaf(), 0..5),
        0..8,
    )
    .prop_map(|rows| {
        Value::Array(
            rows.into_iter()
                .map(|row| Value::Object(row.into_iter().collect::<Map<String, Value>>()))
                .collect(),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_untouched_output_echoes_input(input in rows()) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let result = rt.block_on(sandbox().execute(ExecutionRequest::new("n = len(input_data)", input.clone())));
        prop_assert!(result.success);
        prop_assert_eq!(result.output_data, input);
    }

    #[test]
    fn test_mutating_input_never_changes_output(input in rows()) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let code = "for row in input_data:\n    row['mutated'] = True\ninput_data.append({'extra': 1})";
        let result = rt.block_on(sandbox().execute(ExecutionRequest::new(code, input.clone())));
        prop_assert!(result.success);
        prop_assert_eq!(result.output_data, input);
    }
}

#[tokio::test]
async fn test_forbidden_operations_are_capability_violations() {
    let sandbox = sandbox();
    for code in [
        "import os",
        "import subprocess",
        "from os import path",
        "import socket",
        "open('/etc/passwd')",
        "eval('1 + 1')",
        "exec('x = 1')",
        "__import__('os')",
        "x = [].__class__",
    ] {
        let result = sandbox
            .execute(ExecutionRequest::new(code, json!([{"a": 1}])))
            .await;
        assert!(!result.success, "{code} should fail");
        assert_eq!(
            result.error_kind(),
            Some(ErrorKind::CapabilityViolation),
            "{code}"
        );
        assert_eq!(result.output_data, Value::Null);
    }
}

#[tokio::test]
async fn test_timeout_reclaims_slot_for_next_call() {
    let sandbox = Sandbox::new(
        Bindings::standard(),
        ExecutionLimits {
            timeout: Duration::from_millis(250),
            grace_period: Duration::from_millis(500),
            max_concurrent: 1,
            ..ExecutionLimits::default()
        },
    );

    let started = Instant::now();
    let result = sandbox
        .execute(ExecutionRequest::new(
            "def spin(n):\n    while True:\n        n += 1\nspin(0)",
            json!([]),
        ))
        .await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.error_kind(), Some(ErrorKind::ResourceExceeded));

    let result = sandbox
        .execute(ExecutionRequest::new("output_data = sum(range(10))", json!([])))
        .await;
    assert!(result.success);
    assert_eq!(result.output_data, json!(45));
}

#[tokio::test]
async fn test_concurrent_executions_are_isolated() {
    let sandbox = sandbox();
    let calls = (0..8).map(|i| {
        let sandbox = sandbox.clone();
        async move {
            let code = format!("shared = {i}\nprint(shared)\noutput_data = [shared]");
            (i, sandbox.execute(ExecutionRequest::new(code, json!([]))).await)
        }
    });
    for (i, result) in futures::future::join_all(calls).await {
        assert!(result.success);
        assert_eq!(result.output_data, json!([i]));
        assert_eq!(result.stdout, format!("{i}\n"));
    }
}

#[tokio::test]
async fn test_state_does_not_leak_between_calls() {
    let sandbox = sandbox();
    let first = sandbox
        .execute(ExecutionRequest::new("leftover = 1", json!([])))
        .await;
    assert!(first.success);
    let second = sandbox
        .execute(ExecutionRequest::new("output_data = leftover", json!([])))
        .await;
    assert_eq!(second.error_kind(), Some(ErrorKind::RuntimeError));
    assert!(second.error.unwrap().message.starts_with("NameError"));
}

#[tokio::test]
async fn test_output_is_truncated_not_fatal_by_default() {
    let sandbox = Sandbox::new(
        Bindings::standard(),
        ExecutionLimits {
            max_output_bytes: 32,
            ..ExecutionLimits::default()
        },
    );
    let result = sandbox
        .execute(ExecutionRequest::new(
            "for i in range(1000):\n    print('line', i)\noutput_data = 'done'",
            json!([]),
        ))
        .await;
    assert!(result.success);
    assert_eq!(result.output_data, json!("done"));
    assert!(result.stdout.ends_with("[output truncated: limit of 32 bytes reached]\n"));
}

#[test]
fn test_validate_never_runs_code() {
    let result = sandbox().validate("print('side effect')\nwhile True:\n    pass");
    assert!(result.valid);
    assert!(result.error.is_none());
}

#[tokio::test]
#[traced_test]
async fn test_internal_errors_are_logged_separately() {
    let sandbox = Sandbox::with_child_process(
        Bindings::standard(),
        ExecutionLimits::default(),
        PathBuf::from("/nonexistent/sandboxd"),
    );
    let result = sandbox
        .execute(ExecutionRequest::new("x = 1", json!([])))
        .await;
    assert_eq!(result.error_kind(), Some(ErrorKind::InternalError));
    assert!(logs_contain("sandbox_internal_error"));
    assert_eq!(sandbox.health().internal_errors, 1);
}
