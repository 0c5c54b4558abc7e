//! IPC integration tests: codec→router→sandbox→response round-trip.

use code_sandbox::ipc::codec::{write_frame, MSG_ERROR, MSG_REQUEST, MSG_RESPONSE};
use code_sandbox::ipc::IpcServer;
use code_sandbox::sandbox::{Bindings, Sandbox};
use code_sandbox::types::{ExecutionLimits, IpcConfig};
use serde_json::json;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

/// Helper: spin up an IpcServer on a random port, return (addr, server).
async fn start_test_server(limits: ExecutionLimits) -> (std::net::SocketAddr, std::sync::Arc<IpcServer>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let sandbox = Sandbox::new(Bindings::standard(), limits);
    let server = std::sync::Arc::new(IpcServer::new(sandbox, addr, IpcConfig::default()));
    let running = server.clone();
    tokio::spawn(async move {
        let _ = running.serve_listener(listener).await;
    });

    (addr, server)
}

async fn read_response(stream: &mut TcpStream) -> (u8, serde_json::Value) {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let frame_len = u32::from_be_bytes(len_buf) as usize;
    let mut frame_data = vec![0u8; frame_len];
    stream.read_exact(&mut frame_data).await.unwrap();

    let msg_type = frame_data[0];
    let response: serde_json::Value = rmp_serde::from_slice(&frame_data[1..]).unwrap();
    (msg_type, response)
}

/// Helper: send a request frame, receive and decode the response.
async fn round_trip(
    stream: &mut TcpStream,
    service: &str,
    method: &str,
    body: serde_json::Value,
) -> (u8, serde_json::Value) {
    let request = json!({
        "id": "test-1",
        "service": service,
        "method": method,
        "body": body,
    });

    let payload = rmp_serde::to_vec_named(&request).unwrap();
    write_frame(stream, MSG_REQUEST, &payload).await.unwrap();
    read_response(stream).await
}

#[tokio::test]
async fn test_execute_round_trip() {
    let (addr, _server) = start_test_server(ExecutionLimits::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let body = json!({
        "code": "import numpy as np\nvals = [r['v'] for r in input_data]\nprint(np.mean(vals))\noutput_data = [{'v': v, 'z': v - np.mean(vals)} for v in vals]",
        "input_data": [{"v": 1}, {"v": 3}],
    });
    let (msg_type, response) = round_trip(&mut stream, "sandbox", "Execute", body).await;

    assert_eq!(msg_type, MSG_RESPONSE);
    assert_eq!(response["id"], "test-1");
    assert_eq!(response["ok"], true);
    let result = &response["body"];
    assert_eq!(result["success"], true);
    assert_eq!(result["stdout"], "2.0\n");
    assert_eq!(
        result["output_data"],
        json!([{"v": 1, "z": -1.0}, {"v": 3, "z": 1.0}])
    );
}

#[tokio::test]
async fn test_capability_violation_is_a_result() {
    let (addr, _server) = start_test_server(ExecutionLimits::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) = round_trip(
        &mut stream,
        "sandbox",
        "Execute",
        json!({"code": "import os\nos.system('id')", "input_data": []}),
    )
    .await;

    assert_eq!(msg_type, MSG_RESPONSE);
    let result = &response["body"];
    assert_eq!(result["success"], false);
    assert_eq!(result["error"]["kind"], "CapabilityViolation");
    assert_eq!(result["output_data"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_validate_and_health() {
    let (addr, _server) = start_test_server(ExecutionLimits::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) =
        round_trip(&mut stream, "sandbox", "Validate", json!({"code": "def f(:"})).await;
    assert_eq!(msg_type, MSG_RESPONSE);
    assert_eq!(response["body"]["valid"], false);
    assert_eq!(response["body"]["error"]["line"], 1);

    let (msg_type, response) = round_trip(&mut stream, "sandbox", "Health", json!({})).await;
    assert_eq!(msg_type, MSG_RESPONSE);
    assert_eq!(response["body"]["status"], "healthy");
    assert_eq!(response["body"]["service"], "custom-code-executor");
}

#[tokio::test]
async fn test_unknown_service_returns_error() {
    let (addr, _server) = start_test_server(ExecutionLimits::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) = round_trip(&mut stream, "scheduler", "Foo", json!({})).await;

    assert_eq!(msg_type, MSG_ERROR);
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_unexpected_message_type() {
    let (addr, _server) = start_test_server(ExecutionLimits::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    write_frame(&mut stream, MSG_RESPONSE, b"").await.unwrap();
    let (msg_type, response) = read_response(&mut stream).await;
    assert_eq!(msg_type, MSG_ERROR);
    assert_eq!(response["error"]["code"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_timeout_does_not_block_other_connections() {
    let limits = ExecutionLimits {
        timeout: Duration::from_millis(300),
        grace_period: Duration::from_millis(500),
        max_concurrent: 2,
        ..ExecutionLimits::default()
    };
    let (addr, _server) = start_test_server(limits).await;

    let mut slow = TcpStream::connect(addr).await.unwrap();
    let mut fast = TcpStream::connect(addr).await.unwrap();

    let spin = tokio::spawn(async move {
        round_trip(
            &mut slow,
            "sandbox",
            "Execute",
            json!({"code": "while True:\n    pass", "input_data": []}),
        )
        .await
    });

    let (_, response) = round_trip(
        &mut fast,
        "sandbox",
        "Execute",
        json!({"code": "output_data = 'ok'", "input_data": []}),
    )
    .await;
    assert_eq!(response["body"]["output_data"], "ok");

    let (_, response) = spin.await.unwrap();
    assert_eq!(response["body"]["error"]["kind"], "ResourceExceeded");
    assert_eq!(response["body"]["error"]["message"], "execution timed out");
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let (addr, server) = start_test_server(ExecutionLimits::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let (msg_type, _) = round_trip(&mut stream, "sandbox", "Health", json!({})).await;
    assert_eq!(msg_type, MSG_RESPONSE);

    server.shutdown();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Open connections are closed on cancellation.
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}
