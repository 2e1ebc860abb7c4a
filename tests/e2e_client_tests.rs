//! End-to-end tests for the MCP client against a mock server
//!
//! Covers connection handshake, tool routing, the error codes of the call
//! pipeline, authentication headers and shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{args, permissive_config, MockBehavior, MockServer};
use ryan_mcp::mcp_client::{
    AuthType, ClientConfig, ErrorCode, McpClient, McpError, SchemaKind, ServerStatus,
    ToolCallRequest,
};
use serde_json::json;

async fn connected(server: &MockServer) -> McpClient {
    let client = McpClient::new(permissive_config());
    client
        .connect_to_server(server.server_config("mock"))
        .await
        .expect("connect to mock server");
    client
}

// =============================================================================
// Connection
// =============================================================================

#[tokio::test]
async fn test_connect_loads_tools_and_schemas() {
    let server = MockServer::spawn().await;
    let client = connected(&server).await;

    assert!(client.is_connected("mock"));
    let tools = client.list_tools("mock").unwrap();
    assert_eq!(tools.len(), 7);
    assert!(tools.iter().all(|t| t.server_name == "mock" && t.server_url == server.url));

    let info = &client.list_servers()[0];
    assert_eq!(info.status, ServerStatus::Connected);
    assert_eq!(info.available_tools, 7);
    assert!(info.connected_at.is_some());
    assert!(info.last_ping.is_some());

    // echo and bad_output publish schemas: two for echo, one for bad_output
    assert_eq!(client.schema_cache().size(), 3);
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let server = MockServer::spawn().await;
    let client = connected(&server).await;
    client
        .connect_to_server(server.server_config("mock"))
        .await
        .unwrap();
    assert_eq!(client.list_servers().len(), 1);
}

#[tokio::test]
async fn test_failed_listing_still_connects() {
    let server = MockServer::spawn_without_tools().await;
    let client = McpClient::new(permissive_config());
    client
        .connect_to_server(server.server_config("bare"))
        .await
        .unwrap();

    assert!(client.is_connected("bare"));
    assert!(client.list_tools("bare").unwrap().is_empty());
}

#[tokio::test]
async fn test_connect_all_reports_failures() {
    let server = MockServer::spawn().await;
    let client = McpClient::new(permissive_config());

    let failures = client
        .connect_all(&[
            server.server_config("good"),
            ryan_mcp::ServerConfig::new("dead", "http://127.0.0.1:1/mcp"),
        ])
        .await;

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "dead");
    assert!(matches!(failures[0].1, McpError::ConnectFailed { .. }));
    assert!(client.is_connected("good"));
}

#[tokio::test]
async fn test_disconnect_removes_tools() {
    let server = MockServer::spawn().await;
    let client = connected(&server).await;

    client.disconnect_from_server("mock").await.unwrap();
    assert!(!client.is_connected("mock"));
    assert!(client.list_all_tools().is_empty());

    let result = client
        .call_tool(ToolCallRequest::new("echo", args(json!({"message": "hi"}))))
        .await
        .unwrap();
    assert_eq!(result.error_code, Some(ErrorCode::ToolNotFound));
}

#[tokio::test]
async fn test_null_ping_result_still_connects() {
    let server = MockServer::spawn_with(MockBehavior {
        null_ping: true,
        ..MockBehavior::default()
    })
    .await;
    let client = connected(&server).await;

    assert!(client.is_connected("mock"));
    assert_eq!(client.list_tools("mock").unwrap().len(), 7);
}

#[tokio::test]
async fn test_reconnect_drops_stale_schemas() {
    let server = MockServer::spawn().await;
    let client = connected(&server).await;
    assert_eq!(client.schema_cache().size(), 3);

    client.disconnect_from_server("mock").await.unwrap();
    assert_eq!(client.schema_cache().size(), 0);

    server.stop_publishing_schemas();
    client
        .connect_to_server(server.server_config("mock"))
        .await
        .unwrap();

    assert_eq!(client.schema_cache().size(), 0);
    assert_eq!(
        client.get_tool_schema(None, "echo", SchemaKind::Input).unwrap(),
        None
    );
    let result = client
        .call_tool(ToolCallRequest::new("echo", args(json!({}))))
        .await
        .unwrap();
    assert!(!result.is_error, "{:?}", result.error_detail);
}

#[tokio::test]
async fn test_close_empties_schema_cache() {
    let server = MockServer::spawn().await;
    let client = connected(&server).await;
    assert!(client.schema_cache().size() > 0);

    client.close().await;
    assert_eq!(client.schema_cache().size(), 0);
}

#[tokio::test]
async fn test_overlapping_connects_keep_first_connection() {
    let server = MockServer::spawn_with(MockBehavior {
        first_ping_delay: Some(Duration::from_millis(400)),
        ..MockBehavior::default()
    })
    .await;
    let client = Arc::new(McpClient::new(permissive_config()));

    // This handshake stalls on the delayed ping while the second one finishes.
    let late = tokio::spawn({
        let client = Arc::clone(&client);
        let config = server.server_config("mock");
        async move { client.connect_to_server(config).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    client
        .connect_to_server(server.server_config("mock"))
        .await
        .unwrap();
    let result = client
        .call_tool(ToolCallRequest::new("echo", args(json!({"message": "hi"}))))
        .await
        .unwrap();
    assert!(!result.is_error);

    late.await.unwrap().unwrap();

    let servers = client.list_servers();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].total_calls, 1);
    assert_eq!(client.schema_cache().size(), 3);
}

// =============================================================================
// Tool Calls
// =============================================================================

#[tokio::test]
async fn test_call_round_trip() {
    let server = MockServer::spawn().await;
    let client = connected(&server).await;

    let result = client
        .call_tool(ToolCallRequest::new("echo", args(json!({"message": "hello"}))))
        .await
        .unwrap();

    assert!(!result.is_error, "{:?}", result.error_detail);
    assert_eq!(result.content.as_deref(), Some("hello"));
    assert_eq!(result.structured_content.as_ref().unwrap()["echo"], "hello");
    assert_eq!(result.metadata["echoed"], true);
    assert_eq!(result.server_name, "mock");

    let info = &client.list_servers()[0];
    assert_eq!(info.total_calls, 1);
    assert_eq!(info.successful_calls, 1);
}

#[tokio::test]
async fn test_content_array_result() {
    let server = MockServer::spawn().await;
    let client = connected(&server).await;

    let result = client
        .call_tool(ToolCallRequest::new("read_file", args(json!({"path": "/tmp/a"}))))
        .await
        .unwrap();

    assert!(!result.is_error);
    assert_eq!(result.content_array.len(), 1);
    assert_eq!(result.content_array[0].content.as_deref(), Some("file body"));
}

#[tokio::test]
async fn test_input_validation_error_skips_dispatch() {
    let server = MockServer::spawn().await;
    let client = connected(&server).await;

    let result = client
        .call_tool(ToolCallRequest::new("echo", args(json!({"message": 7}))))
        .await
        .unwrap();

    assert_eq!(result.error_code, Some(ErrorCode::ValidationError));
    assert_eq!(server.call_count(), 0);
    assert_eq!(client.list_servers()[0].total_calls, 0);
}

#[tokio::test]
async fn test_output_validation_error() {
    let server = MockServer::spawn().await;
    let client = connected(&server).await;

    let result = client
        .call_tool(ToolCallRequest::new("bad_output", args(json!({}))))
        .await
        .unwrap();

    assert!(result.is_error);
    assert_eq!(result.error_code, Some(ErrorCode::OutputValidationError));
    assert_eq!(result.structured_content.as_ref().unwrap()["count"], "many");
}

#[tokio::test]
async fn test_output_validation_can_be_disabled() {
    let server = MockServer::spawn().await;
    let client = McpClient::new(ClientConfig {
        enable_output_validation: false,
        ..permissive_config()
    });
    client
        .connect_to_server(server.server_config("mock"))
        .await
        .unwrap();

    let result = client
        .call_tool(ToolCallRequest::new("bad_output", args(json!({}))))
        .await
        .unwrap();
    assert!(!result.is_error);
}

#[tokio::test]
async fn test_server_error_code_and_data() {
    let server = MockServer::spawn().await;
    let client = connected(&server).await;

    let result = client
        .call_tool(ToolCallRequest::new("explode", args(json!({}))))
        .await
        .unwrap();

    assert_eq!(result.error_code, Some(ErrorCode::ServerError(-32000)));
    assert!(result.error_code.as_ref().unwrap() == &"SERVER_ERROR_-32000");
    assert_eq!(result.error_detail.as_deref(), Some("tool exploded"));
    assert_eq!(result.metadata["retryAfter"], 5);

    let info = &client.list_servers()[0];
    assert_eq!(info.failed_calls, 1);
    assert!(info.last_error.is_some());
}

#[tokio::test]
async fn test_unrecognized_result_is_parsing_error() {
    let server = MockServer::spawn().await;
    let client = connected(&server).await;

    let result = client
        .call_tool(ToolCallRequest::new("number", args(json!({}))))
        .await
        .unwrap();
    assert_eq!(result.error_code, Some(ErrorCode::ParsingError));
}

#[tokio::test]
async fn test_tool_reported_error_is_kept() {
    let server = MockServer::spawn().await;
    let client = connected(&server).await;

    let result = client
        .call_tool(ToolCallRequest::new("tool_error", args(json!({}))))
        .await
        .unwrap();
    assert!(result.is_error);
    assert_eq!(result.error_code, Some(ErrorCode::Other("DISK_FULL".into())));
    assert_eq!(result.error_detail.as_deref(), Some("no space left"));
}

#[tokio::test]
async fn test_request_timeout_is_communication_error() {
    let server = MockServer::spawn().await;
    let client = connected(&server).await;

    let result = client
        .call_tool(
            ToolCallRequest::new("slow", args(json!({}))).with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    assert_eq!(result.error_code, Some(ErrorCode::CommunicationError));
    assert!(result.execution_time < common::SLOW_TOOL_DELAY);
}

#[tokio::test]
async fn test_default_timeout_applies() {
    let server = MockServer::spawn().await;
    let client = McpClient::new(ClientConfig {
        default_timeout: Duration::from_millis(50),
        ..permissive_config()
    });
    client
        .connect_to_server(server.server_config("mock"))
        .await
        .unwrap();

    let result = client
        .call_tool(ToolCallRequest::new("slow", args(json!({}))))
        .await
        .unwrap();
    assert_eq!(result.error_code, Some(ErrorCode::CommunicationError));
}

#[tokio::test]
async fn test_concurrent_calls_are_all_counted() {
    let server = MockServer::spawn().await;
    let client = Arc::new(connected(&server).await);

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .call_tool(ToolCallRequest::new(
                        "echo",
                        args(json!({"message": format!("m{i}")})),
                    ))
                    .await
            })
        })
        .collect();

    let mut latencies = Vec::new();
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert!(!result.is_error);
        latencies.push(result.execution_time);
    }

    let info = &client.list_servers()[0];
    assert_eq!(info.total_calls, 20);
    assert_eq!(info.successful_calls + info.failed_calls, info.total_calls);
    assert_eq!(server.call_count(), 20);

    // The running average must agree with a plain mean of the same samples,
    // up to nanosecond truncation per update.
    let min = *latencies.iter().min().unwrap();
    let max = *latencies.iter().max().unwrap();
    assert!(info.average_latency >= min && info.average_latency <= max);

    let mean = latencies.iter().sum::<Duration>() / latencies.len() as u32;
    let drift = if info.average_latency > mean {
        info.average_latency - mean
    } else {
        mean - info.average_latency
    };
    assert!(drift <= Duration::from_micros(1), "average {:?} vs mean {mean:?}", info.average_latency);
}

#[tokio::test]
async fn test_get_tool_schema_by_kind() {
    let server = MockServer::spawn().await;
    let client = connected(&server).await;

    let input = client.get_tool_schema(None, "echo", SchemaKind::Input).unwrap();
    assert_eq!(input.unwrap()["required"][0], "message");

    let output = client
        .get_tool_schema(Some("mock"), "echo", SchemaKind::Output)
        .unwrap();
    assert_eq!(output.unwrap()["required"][0], "echo");

    assert!(client
        .get_tool_schema(None, "explode", SchemaKind::Input)
        .unwrap()
        .is_none());

    assert!(client.validate_tool_output("echo", &json!({"echo": "x"})).is_ok());
    assert!(matches!(
        client.validate_tool_output("echo", &json!({})),
        Err(McpError::ValidationFailed { .. })
    ));
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_bearer_header_is_sent() {
    let server = MockServer::spawn().await;
    let mut cfg = server.server_config("auth");
    cfg.auth_type = AuthType::Bearer;
    cfg.credentials.insert("token".into(), "s3cret".into());

    let client = McpClient::new(permissive_config());
    client.connect_to_server(cfg).await.unwrap();

    assert_eq!(server.last_header("authorization").as_deref(), Some("Bearer s3cret"));
}

#[tokio::test]
async fn test_api_key_custom_header() {
    let server = MockServer::spawn().await;
    let mut cfg = server.server_config("auth");
    cfg.auth_type = AuthType::ApiKey;
    cfg.credentials.insert("key".into(), "k-123".into());
    cfg.credentials.insert("header".into(), "X-Custom-Key".into());

    let client = McpClient::new(permissive_config());
    client.connect_to_server(cfg).await.unwrap();

    assert_eq!(server.last_header("x-custom-key").as_deref(), Some("k-123"));
    assert!(server.last_header("x-api-key").is_none());
}

// =============================================================================
// Keep-alive and Shutdown
// =============================================================================

#[tokio::test]
async fn test_keep_alive_pings_and_close_stops_it() {
    let server = MockServer::spawn().await;
    let client = McpClient::new(ClientConfig {
        keep_alive_interval: Duration::from_millis(20),
        ..permissive_config()
    });
    let mut cfg = server.server_config("mock");
    cfg.keep_alive = true;
    client.connect_to_server(cfg).await.unwrap();

    let first_ping = client.list_servers()[0].last_ping.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    let later_ping = client.list_servers()[0].last_ping.unwrap();
    assert!(later_ping > first_ping);

    client.close().await;
    assert!(client.list_servers().is_empty());
    assert!(matches!(
        client.call_tool(ToolCallRequest::new("echo", args(json!({})))).await,
        Err(McpError::ClientClosed)
    ));
}
