//! End-to-end tests for permission enforcement in the call pipeline
//!
//! The mock server counts `tools/call` requests, so a denied call can be
//! shown to never reach the wire.

mod common;

use std::sync::Arc;

use common::{args, permissive_config, MockServer};
use ryan_mcp::mcp_client::{ClientConfig, ErrorCode, McpClient, ToolCallRequest};
use ryan_mcp::permissions::{
    CallerContext, FilePermissionRule, Permission, PermissionAction, PermissionError,
    PermissionEvaluator, PermissionManager, PermissionResult, PermissionRule, PermissionScope,
};
use serde_json::{json, Map, Value};

async fn client_with(server: &MockServer, evaluator: Arc<dyn PermissionEvaluator>) -> McpClient {
    let client = McpClient::new(ClientConfig::default()).with_permissions(evaluator);
    client
        .connect_to_server(server.server_config("mock"))
        .await
        .expect("connect to mock server");
    client
}

/// An evaluator whose every check fails.
struct BrokenEvaluator;

impl PermissionEvaluator for BrokenEvaluator {
    fn can_execute_tool(
        &self,
        tool_name: &str,
        _params: &Map<String, Value>,
        _caller: &CallerContext,
    ) -> Result<PermissionResult, PermissionError> {
        Err(PermissionError::EvaluationFailed {
            tool: tool_name.to_string(),
            reason: "policy store offline".into(),
        })
    }

    fn can_access_resource(
        &self,
        resource_type: &str,
        _resource_path: &str,
        _caller: &CallerContext,
    ) -> Result<PermissionResult, PermissionError> {
        Err(PermissionError::EvaluationFailed {
            tool: resource_type.to_string(),
            reason: "policy store offline".into(),
        })
    }

    fn grant_tool_permission(&self, _: &str, _: PermissionScope) -> Result<(), PermissionError> {
        Ok(())
    }

    fn revoke_tool_permission(&self, _: &str, _: PermissionScope) -> Result<(), PermissionError> {
        Ok(())
    }

    fn list_tool_permissions(&self, _: &str) -> Result<Vec<Permission>, PermissionError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_default_ask_denies_before_dispatch() {
    let server = MockServer::spawn().await;
    let client = client_with(&server, Arc::new(PermissionManager::default())).await;

    let result = client
        .call_tool(ToolCallRequest::new("echo", args(json!({"message": "hi"}))))
        .await
        .unwrap();

    assert_eq!(result.error_code, Some(ErrorCode::PermissionDenied));
    assert_eq!(result.metadata["permissionAction"], "ask");
    assert_eq!(server.call_count(), 0);
    assert_eq!(client.list_servers()[0].total_calls, 0);
}

#[tokio::test]
async fn test_evaluator_failure_is_permission_error() {
    let server = MockServer::spawn().await;
    let client = client_with(&server, Arc::new(BrokenEvaluator)).await;

    let result = client
        .call_tool(ToolCallRequest::new("echo", args(json!({"message": "hi"}))))
        .await
        .unwrap();

    assert_eq!(result.error_code, Some(ErrorCode::PermissionError));
    assert!(result.error_detail.unwrap().contains("policy store offline"));
    assert_eq!(server.call_count(), 0);
}

#[tokio::test]
async fn test_grant_then_revoke() {
    let server = MockServer::spawn().await;
    let manager = Arc::new(PermissionManager::default());
    let client = client_with(&server, manager.clone()).await;
    let request = || ToolCallRequest::new("echo", args(json!({"message": "hi"})));

    manager
        .grant_tool_permission("echo", PermissionScope::Global)
        .unwrap();
    let allowed = client.call_tool(request()).await.unwrap();
    assert!(!allowed.is_error, "{:?}", allowed.error_detail);

    manager
        .revoke_tool_permission("echo", PermissionScope::Global)
        .unwrap();
    let denied = client.call_tool(request()).await.unwrap();
    assert_eq!(denied.error_code, Some(ErrorCode::PermissionDenied));
    assert_eq!(denied.metadata["permissionAction"], "deny");
    assert_eq!(server.call_count(), 1);
}

#[tokio::test]
async fn test_project_grant_follows_request_context() {
    let server = MockServer::spawn().await;
    let manager = Arc::new(PermissionManager::default());
    let client = client_with(&server, manager.clone()).await;

    manager
        .grant_tool_permission("echo", PermissionScope::project("/work/repo"))
        .unwrap();

    let inside = client
        .call_tool(
            ToolCallRequest::new("echo", args(json!({"message": "hi"})))
                .with_context("projectRoot", json!("/work/repo")),
        )
        .await
        .unwrap();
    assert!(!inside.is_error);

    let outside = client
        .call_tool(
            ToolCallRequest::new("echo", args(json!({"message": "hi"})))
                .with_context("projectRoot", json!("/elsewhere")),
        )
        .await
        .unwrap();
    assert_eq!(outside.error_code, Some(ErrorCode::PermissionDenied));
}

#[tokio::test]
async fn test_file_rule_limits_paths() {
    let server = MockServer::spawn().await;
    let manager = Arc::new(PermissionManager::new(PermissionAction::Deny));
    manager.add_file_rule(
        FilePermissionRule::new(
            PermissionRule::new("tmp_reads", "Reads under /tmp", PermissionAction::Allow)
                .for_tool("read_file")
                .unwrap(),
        )
        .with_allowed_paths(&["/tmp"]),
    );
    let client = client_with(&server, manager).await;

    let ok = client
        .call_tool(ToolCallRequest::new("read_file", args(json!({"path": "/tmp/notes.txt"}))))
        .await
        .unwrap();
    assert!(!ok.is_error, "{:?}", ok.error_detail);

    let blocked = client
        .call_tool(ToolCallRequest::new("read_file", args(json!({"path": "/etc/passwd"}))))
        .await
        .unwrap();
    assert_eq!(blocked.error_code, Some(ErrorCode::PermissionDenied));
}

#[tokio::test]
async fn test_default_rules_block_dangerous_shell() {
    let manager = PermissionManager::new(PermissionAction::Allow);
    manager.load_default_rules().unwrap();
    let caller = CallerContext::default();

    let dangerous = manager
        .can_execute_tool("bash", &args(json!({"command": "sudo rm -rf /"})), &caller)
        .unwrap();
    assert!(!dangerous.allowed);
    assert_eq!(dangerous.action, PermissionAction::Deny);

    let harmless = manager
        .can_execute_tool("bash", &args(json!({"command": "ls -la"})), &caller)
        .unwrap();
    assert!(harmless.allowed);

    let file = manager
        .can_execute_tool("read_config", &args(json!({})), &caller)
        .unwrap();
    assert_eq!(file.action, PermissionAction::Ask);
}

#[tokio::test]
async fn test_permissions_disabled_skips_checks() {
    let server = MockServer::spawn().await;
    let client = McpClient::new(ClientConfig {
        enable_permissions: false,
        ..permissive_config()
    })
    .with_permissions(Arc::new(BrokenEvaluator));
    client
        .connect_to_server(server.server_config("mock"))
        .await
        .unwrap();

    let result = client
        .call_tool(ToolCallRequest::new("echo", args(json!({"message": "hi"}))))
        .await
        .unwrap();
    assert!(!result.is_error);
}
