//! Child-process isolation against the real `sandboxd exec` worker.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use code_sandbox::sandbox::{Bindings, ErrorKind, ExecutionRequest, Sandbox};
use code_sandbox::types::ExecutionLimits;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn worker_program() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sandboxd"))
}

fn child(limits: ExecutionLimits) -> Sandbox {
    Sandbox::with_child_process(Bindings::standard(), limits, worker_program())
}

fn in_process(limits: ExecutionLimits) -> Sandbox {
    Sandbox::new(Bindings::standard(), limits)
}

fn request(code: &str) -> ExecutionRequest {
    ExecutionRequest::new(code, json!([]))
}

#[tokio::test]
async fn test_child_run_succeeds() {
    let sandbox = child(ExecutionLimits::default());
    let result = sandbox
        .execute(ExecutionRequest::new(
            "import numpy as np\nprint('rows', len(input_data))\noutput_data = [{'v': r['v'] * 2} for r in input_data]",
            json!([{"v": 1}, {"v": 4}]),
        ))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output_data, json!([{"v": 2}, {"v": 8}]));
    assert_eq!(result.stdout, "rows 2\n");
    assert_eq!(sandbox.health().completed, 1);
}

#[tokio::test]
async fn test_child_timeout_then_recovery() {
    let sandbox = child(ExecutionLimits {
        timeout: Duration::from_millis(300),
        grace_period: Duration::from_millis(300),
        max_concurrent: 1,
        ..ExecutionLimits::default()
    });

    let started = Instant::now();
    let result = sandbox.execute(request("while True:\n    pass")).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::ResourceExceeded));
    assert_eq!(result.error.as_ref().map(|e| e.message.as_str()), Some("execution timed out"));
    assert!(started.elapsed() < Duration::from_secs(5));

    let result = sandbox.execute(request("output_data = 'after'")).await;
    assert!(result.success);
    assert_eq!(result.output_data, json!("after"));
    assert_eq!(sandbox.health().available_slots, 1);
}

#[tokio::test]
async fn test_limits_are_forwarded_to_the_child() {
    let cases: Vec<(ExecutionLimits, &str)> = vec![
        (
            ExecutionLimits {
                max_output_bytes: 16,
                output_overflow_fatal: true,
                ..ExecutionLimits::default()
            },
            "for i in range(100):\n    print('line', i)",
        ),
        (
            ExecutionLimits {
                max_call_depth: 3,
                ..ExecutionLimits::default()
            },
            "def down(n):\n    if n == 0:\n        return 0\n    return down(n - 1)\noutput_data = down(10)",
        ),
        (
            ExecutionLimits {
                max_collection_len: 10,
                ..ExecutionLimits::default()
            },
            "output_data = [0] * 100",
        ),
        (
            ExecutionLimits {
                max_live_elements: 1000,
                ..ExecutionLimits::default()
            },
            "x = []\nfor i in range(100):\n    x.append([0] * 50)",
        ),
        (
            ExecutionLimits {
                max_code_bytes: 8,
                ..ExecutionLimits::default()
            },
            "output_data = 'this script is longer than eight bytes'",
        ),
    ];

    for (limits, code) in cases {
        let expected = in_process(limits.clone()).execute(request(code)).await;
        let actual = child(limits).execute(request(code)).await;
        assert!(!expected.success, "in-process run of {:?} succeeded", code);
        assert_eq!(actual.error_kind(), expected.error_kind(), "{}", code);
        assert_eq!(actual.success, expected.success, "{}", code);
    }
}

#[tokio::test]
async fn test_deeply_nested_values_in_child() {
    let sandbox = child(ExecutionLimits::default());

    let result = sandbox
        .execute(request("a = []\nfor i in range(200000):\n    a = [a]\nprint(a)\noutput_data = a"))
        .await;
    assert_eq!(result.error_kind(), Some(ErrorKind::SerializationError));
    assert_eq!(result.output_data, Value::Null);

    let result = sandbox
        .execute(request("a = []\nb = []\nfor i in range(200000):\n    a = [a]\n    b = [b]\noutput_data = a == b"))
        .await;
    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeError));
    assert!(result.error.unwrap().message.starts_with("RecursionError"));
}

#[tokio::test]
async fn test_non_finite_output_in_child() {
    let result = child(ExecutionLimits::default())
        .execute(request("output_data = float('nan')"))
        .await;
    assert_eq!(result.error_kind(), Some(ErrorKind::SerializationError));
    assert_eq!(result.output_data, Value::Null);
}
