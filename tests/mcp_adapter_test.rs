//! Protocol adapter integration tests against the `mcp_test_server` binary
//!
//! Covers negotiation for both protocol revisions, asynchronous tool calls
//! with polling and cancellation, and fallback probing for servers that
//! expose tools under prefixed method names.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use mcp_conformance::mcp::protocol::{
    AdapterState, Mcp20241105Adapter, Mcp20250326Adapter, ProtocolAdapter, ProtocolOptions,
};
use mcp_conformance::mcp::server::ServerHarness;
use mcp_conformance::mcp::transport::stdio::{ProcessSpec, StdioTransport};
use mcp_conformance::mcp::transport::{Transport, TransportState};
use mcp_conformance::ConformanceError;

fn transport_with_env(env: &[(&str, &str)]) -> Arc<StdioTransport> {
    let mut spec = ProcessSpec::new(common::test_server_exe().to_string_lossy().into_owned());
    for (k, v) in env {
        spec = spec.with_env(*k, *v);
    }
    Arc::new(StdioTransport::new(spec, common::fast_settings()))
}

fn quick_options() -> ProtocolOptions {
    ProtocolOptions {
        poll_interval: Duration::from_millis(20),
        async_timeout: Duration::from_secs(5),
        ..ProtocolOptions::default()
    }
}

fn async_client_caps() -> serde_json::Value {
    json!({"tools": {"asyncSupported": true}})
}

async fn ready_2025(env: &[(&str, &str)], options: ProtocolOptions) -> ServerHarness {
    let transport = transport_with_env(env);
    let adapter = Arc::new(Mcp20250326Adapter::new(transport.clone(), options));
    let harness = ServerHarness::new(transport, adapter, async_client_caps());
    harness.start().await.expect("harness failed to start");
    harness
}

#[tokio::test]
async fn test_lifecycle_against_real_server_2024() {
    let transport = transport_with_env(&[]);
    let adapter = Arc::new(Mcp20241105Adapter::new(
        transport.clone(),
        ProtocolOptions::default(),
    ));
    let harness = ServerHarness::new(transport.clone(), adapter.clone(), json!({}));

    let negotiated = harness.start().await.unwrap();
    assert_eq!(negotiated.protocol_version, "2024-11-05");
    assert_eq!(negotiated.server_info.name, "mcp_test_server");
    assert_eq!(adapter.state(), AdapterState::Ready);
    assert!(!adapter.supports_async());

    adapter.ping().await.unwrap();
    let tools = adapter.list_tools().await.unwrap();
    assert!(tools.iter().any(|t| t.name == "echo"));
    assert_eq!(adapter.list_resources().await.unwrap().len(), 1);
    assert_eq!(adapter.list_prompts().await.unwrap().len(), 1);

    let called = adapter
        .call_tool("echo", Some(json!({"text": "hello"})))
        .await
        .unwrap();
    assert_eq!(called["content"][0]["text"], "hello");

    // No async negotiation under this revision, so the task answers inline.
    let value = adapter.invoke_tool("long_task", json!({})).await.unwrap();
    assert_eq!(value, json!({"value": 42}));

    harness.stop().await.unwrap();
    assert_eq!(adapter.state(), AdapterState::Closed);
    assert_eq!(transport.state(), TransportState::Stopped);
}

#[tokio::test]
async fn test_async_tool_call_polls_to_completion() {
    let harness = ready_2025(&[], quick_options()).await;
    let adapter = harness.adapter();
    assert!(adapter.supports_async());

    let value = adapter
        .invoke_tool("long_task", json!({"steps": 3}))
        .await
        .unwrap();
    assert_eq!(value, json!({"value": 42}));
    assert!(adapter.core().operations().in_flight().is_empty());

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_async_failure_surfaces_server_error() {
    let harness = ready_2025(&[], quick_options()).await;

    let err = harness
        .adapter()
        .invoke_tool("fail_task", json!({"steps": 1}))
        .await
        .unwrap_err();
    match err.downcast_ref::<ConformanceError>() {
        Some(ConformanceError::AsyncFailed { error, .. }) => assert_eq!(error.code, -32603),
        other => panic!("expected AsyncFailed, got {:?}", other),
    }
    assert_eq!(harness.adapter().state(), AdapterState::Ready);

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancel_interrupts_polling() {
    let harness = Arc::new(ready_2025(&[], quick_options()).await);

    let worker = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move {
            harness
                .adapter()
                .invoke_tool("long_task", json!({"steps": 10_000}))
                .await
        })
    };

    let adapter = harness.adapter();
    let operation_id = loop {
        if let Some(id) = adapter.core().operations().in_flight().into_iter().next() {
            break id;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    adapter.cancel(&operation_id).await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(3), worker)
        .await
        .expect("polling did not stop after cancel")
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConformanceError>(),
        Some(ConformanceError::AsyncCancelled(_))
    ));

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_async_timeout_is_bounded() {
    let options = ProtocolOptions {
        async_timeout: Duration::from_millis(200),
        ..quick_options()
    };
    let harness = ready_2025(&[], options).await;

    let err = harness
        .adapter()
        .invoke_tool("long_task", json!({"steps": 10_000}))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConformanceError>(),
        Some(ConformanceError::AsyncTimeout { .. })
    ));
    harness.adapter().ping().await.unwrap();

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_server_without_async_gets_plain_calls() {
    let harness = ready_2025(&[("MCP_TEST_SERVER_NO_ASYNC", "1")], quick_options()).await;
    let adapter = harness.adapter();
    assert!(!adapter.supports_async());

    let value = adapter.invoke_tool("long_task", json!({})).await.unwrap();
    assert_eq!(value, json!({"value": 42}));

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_fallback_probing_records_warning() {
    let transport = transport_with_env(&[]);
    let options = ProtocolOptions {
        fallback_probing: true,
        ..ProtocolOptions::default()
    };
    let adapter = Arc::new(Mcp20241105Adapter::new(transport.clone(), options));
    let harness = ServerHarness::new(transport, adapter.clone(), json!({}));
    harness.start().await.unwrap();

    let value = adapter.invoke_tool("legacy_tool", json!({})).await.unwrap();
    assert_eq!(value, json!({"legacy": true}));

    let warnings = adapter.compliance_warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].tool, "legacy_tool");
    assert_eq!(warnings[0].attempted_method, "tools/legacy_tool");

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_without_probing_unknown_method_is_protocol_error() {
    let harness = ready_2025(&[], quick_options()).await;

    let err = harness
        .adapter()
        .invoke_tool("legacy_tool", json!({}))
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConformanceError>()
            .and_then(ConformanceError::rpc_code),
        Some(-32601)
    );
    assert!(harness.adapter().compliance_warnings().is_empty());

    harness.stop().await.unwrap();
}
