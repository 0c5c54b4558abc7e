//! HTTP integration tests: real listener, reqwest client.

use code_sandbox::http;
use code_sandbox::sandbox::{Bindings, Sandbox};
use code_sandbox::types::{ExecutionLimits, HttpConfig};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

struct TestServer {
    base: String,
    cancel: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn start_with(config: HttpConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let cancel = CancellationToken::new();
    let sandbox = Sandbox::new(Bindings::standard(), ExecutionLimits::default());

    let token = cancel.clone();
    tokio::spawn(async move {
        let _ = http::serve(listener, sandbox, &config, token).await;
    });
    TestServer { base, cancel }
}

async fn start() -> TestServer {
    start_with(HttpConfig::default()).await
}

#[tokio::test]
async fn test_health() {
    let server = start().await;
    let response = reqwest::get(format!("{}/health", server.base)).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"status": "healthy", "service": "custom-code-executor"}));
}

#[tokio::test]
async fn test_execute_echoes_input_by_default() {
    let server = start().await;
    let rows = json!([{"a": 1, "b": "x"}, {"a": 2, "b": null}]);
    let response = reqwest::Client::new()
        .post(format!("{}{}", server.base, http::EXECUTE_PATH))
        .json(&json!({"code": "n = len(input_data)", "input_data": rows}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({
            "success": true,
            "output_data": rows,
            "stdout": "",
            "stderr": "",
            "error": null,
        })
    );
}

#[tokio::test]
async fn test_execute_runtime_error_is_200() {
    let server = start().await;
    let response = reqwest::Client::new()
        .post(format!("{}{}", server.base, http::EXECUTE_PATH))
        .json(&json!({"code": "print('before')\nx = 1 / 0", "input_data": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["stdout"], "before\n");
    assert_eq!(body["error"]["kind"], "RuntimeError");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("ZeroDivisionError"));
}

#[tokio::test]
async fn test_execute_missing_code_is_400() {
    let server = start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}{}", server.base, http::EXECUTE_PATH))
        .json(&json!({"input_data": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "MissingInput");
    assert_eq!(body["error"]["message"], "No code provided");

    let response = client
        .post(format!("{}{}", server.base, http::EXECUTE_PATH))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "MissingInput");
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let server = start_with(HttpConfig {
        max_body_bytes: 64,
        ..HttpConfig::default()
    })
    .await;
    let response = reqwest::Client::new()
        .post(format!("{}{}", server.base, http::EXECUTE_PATH))
        .json(&json!({"code": "x = 1", "input_data": [{"pad": "y".repeat(256)}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 413);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "ResourceExceeded");
}

#[tokio::test]
async fn test_validate() {
    let server = start().await;
    let client = reqwest::Client::new();
    let url = format!("{}{}", server.base, http::VALIDATE_PATH);

    let body: Value = client
        .post(&url)
        .json(&json!({"code": "print('never runs')"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"valid": true, "error": null}));

    let body: Value = client
        .post(&url)
        .json(&json!({"code": "x = 1\ndef f(:\n    pass"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["valid"], false);
    assert_eq!(body["error"]["line"], 2);

    let response = client.post(&url).json(&json!({})).send().await.unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({"valid": false, "error": {"line": null, "message": "No code provided"}})
    );
}
