//! Stdio transport integration tests
//!
//! Drives `StdioTransport` against the `mcp_test_server` subprocess: request
//! correlation, batches, stderr capture, environment propagation, and the
//! stop sequence.

mod common;

use std::time::{Duration, Instant};

use serde_json::json;

use mcp_conformance::mcp::framing::{correlate_batch, RpcOutcome};
use mcp_conformance::mcp::transport::stdio::{ProcessSpec, StdioSettings, StdioTransport};
use mcp_conformance::mcp::transport::{Transport, TransportState};
use mcp_conformance::mcp::types::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId, METHOD_NOT_FOUND,
};

fn server_spec() -> ProcessSpec {
    ProcessSpec::new(common::test_server_exe().to_string_lossy().into_owned())
}

async fn started(settings: StdioSettings) -> StdioTransport {
    let transport = StdioTransport::new(server_spec(), settings);
    transport
        .start()
        .await
        .expect("failed to spawn mcp_test_server");
    transport
}

#[tokio::test]
async fn test_echo_with_string_id_round_trips() {
    let transport = started(common::fast_settings()).await;

    let outcome = transport
        .send_request(JsonRpcRequest::new("t1", "echo", json!({"text": "hi"})))
        .await;

    match outcome {
        RpcOutcome::Success { id, result } => {
            assert_eq!(id, RequestId::from("t1"));
            assert_eq!(result["content"][0]["text"], "hi");
        }
        other => panic!("expected success, got {:?}", other),
    }
    transport.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_method_is_protocol_error_not_fault() {
    let transport = started(common::fast_settings()).await;

    let outcome = transport.call("does/not/exist", json!({})).await;
    assert!(!outcome.is_transport_fault());
    assert_eq!(outcome.error().unwrap().code, METHOD_NOT_FOUND);
    assert!(transport.is_alive().await);

    transport.stop().await.unwrap();
}

#[tokio::test]
async fn test_generated_ids_are_distinct_across_requests() {
    let transport = started(common::fast_settings()).await;

    let a = transport.call("ping", json!({})).await;
    let b = transport.call("ping", json!({})).await;
    assert!(a.is_success() && b.is_success());
    assert_ne!(a.id(), b.id());

    transport.stop().await.unwrap();
}

#[tokio::test]
async fn test_batch_replies_correlate_by_id() {
    let transport = started(common::fast_settings()).await;

    let batch = vec![
        JsonRpcMessage::Request(JsonRpcRequest::new(10, "ping", json!({}))),
        JsonRpcMessage::Notification(JsonRpcNotification::new(
            "notifications/initialized",
            json!({}),
        )),
        JsonRpcMessage::Request(JsonRpcRequest::new(11, "nope", json!({}))),
    ];
    let outcomes = transport.send_batch(batch.clone()).await;
    assert_eq!(outcomes.len(), 2);

    let correlation = correlate_batch(&batch, outcomes);
    assert!(correlation.missing.is_empty());
    assert!(correlation.responses[&RequestId::Number(10)].is_success());
    assert_eq!(
        correlation.responses[&RequestId::Number(11)]
            .error()
            .unwrap()
            .code,
        METHOD_NOT_FOUND
    );

    transport.stop().await.unwrap();
}

#[tokio::test]
async fn test_request_timeout_is_transport_fault() {
    let settings = StdioSettings {
        request_timeout: Duration::from_millis(200),
        ..common::fast_settings()
    };
    let transport = started(settings).await;

    let started_at = Instant::now();
    let outcome = transport.call("slow", json!({"ms": 3000})).await;
    assert!(outcome.is_transport_fault());
    assert!(started_at.elapsed() < Duration::from_secs(2));

    transport.stop().await.unwrap();
}

#[tokio::test]
async fn test_stderr_lines_are_captured() {
    let transport = started(common::fast_settings()).await;
    transport.call("ping", json!({})).await;

    let deadline = Instant::now() + Duration::from_secs(2);
    while !transport.stderr_lines().iter().any(|l| l == "recv ping") {
        assert!(Instant::now() < deadline, "stderr never showed the request");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(transport
        .stderr_lines()
        .contains(&"mcp_test_server: ready".to_string()));

    transport.stop().await.unwrap();
}

#[tokio::test]
async fn test_protocol_version_reaches_child_environment() {
    let settings = StdioSettings {
        protocol_version: Some("2024-11-05".to_string()),
        debug: true,
        ..common::fast_settings()
    };
    let transport = started(settings).await;
    transport.call("ping", json!({})).await;

    let deadline = Instant::now() + Duration::from_secs(2);
    let expected = "mcp_test_server: protocol version from env 2024-11-05".to_string();
    while !transport.stderr_lines().contains(&expected) {
        assert!(Instant::now() < deadline, "debug banner missing from stderr");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    transport.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_graceful_and_repeatable() {
    let transport = started(common::fast_settings()).await;
    assert!(transport.pid().await.is_some());

    let started_at = Instant::now();
    transport.stop().await.unwrap();
    assert!(started_at.elapsed() < Duration::from_secs(3));
    assert_eq!(transport.state(), TransportState::Stopped);
    assert!(!transport.is_alive().await);

    transport.stop().await.unwrap();
    assert!(transport.call("ping", json!({})).await.is_transport_fault());
    assert!(transport
        .send_notification(JsonRpcNotification::new("notifications/initialized", json!({})))
        .await
        .is_err());
}

#[tokio::test]
async fn test_restart_after_stop_keeps_ids_unique() {
    let transport = started(common::fast_settings()).await;
    let first = transport.call("ping", json!({})).await;
    transport.stop().await.unwrap();

    transport.start().await.unwrap();
    let second = transport.call("ping", json!({})).await;
    assert!(second.is_success());
    assert_ne!(first.id(), second.id());
    transport.stop().await.unwrap();
}
