//! MCP client: high-level interface for tool execution.
//!
//! Owns every server connection and mediates each tool call through a fixed
//! pipeline: resolve owner, authorize, validate input, dispatch with a
//! deadline, decode the result, validate output, record statistics.
//!
//! Failures a caller should expect (unknown tool, denied, invalid input,
//! transport or server failure, unparsable result) come back as a
//! `ToolCallResult` carrying an `ErrorCode`. The returned `McpError` channel
//! is kept for misuse such as calling a closed client or naming an unknown
//! server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::config::ClientConfig;
use super::errors::McpError;
use super::lifecycle::{self, ConnectionMap, ServerConnection};
use super::schema::{SchemaCache, SchemaSource, SchemaValidator, ToolValidator};
use super::transport::{next_request_id, PayloadLogging};
use super::types::{
    ErrorCode, McpRequest, McpResponse, SchemaKind, ServerConfig, ServerInfo, ToolCallRequest,
    ToolCallResult, ToolDefinition, ToolResultPayload,
};
use crate::permissions::{CallerContext, PermissionEvaluator, PermissionManager};

// ─── Schema Source ───────────────────────────────────────────────────────────

/// Serves schemas straight from the loaded tool definitions.
struct ServerCatalog {
    servers: ConnectionMap,
}

impl SchemaSource for ServerCatalog {
    fn tool_schema(&self, server: &str, tool: &str, kind: SchemaKind) -> Result<Option<Value>, McpError> {
        let conn = self
            .servers
            .read()
            .get(server)
            .cloned()
            .ok_or_else(|| McpError::ServerNotFound {
                name: server.to_string(),
            })?;
        let definition = conn.tool(tool).ok_or_else(|| McpError::ToolNotFound {
            name: tool.to_string(),
        })?;
        Ok(definition.schema(kind).cloned())
    }
}

// ─── McpClient ───────────────────────────────────────────────────────────────

/// Multi-server MCP client. Shareable across tasks behind an `Arc`.
pub struct McpClient {
    config: ClientConfig,
    servers: ConnectionMap,
    schema_cache: Arc<SchemaCache>,
    validator: SchemaValidator,
    permissions: Option<Arc<dyn PermissionEvaluator>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    closed: AtomicBool,
    keep_alive_started: AtomicBool,
}

impl McpClient {
    /// Create a client. When permissions are enabled a `PermissionManager`
    /// with the configured default action and no rules is installed.
    pub fn new(config: ClientConfig) -> Self {
        let servers: ConnectionMap = Arc::default();
        let schema_cache = Arc::new(SchemaCache::new(config.schema_cache_size, config.schema_cache_ttl));
        let source: Arc<dyn SchemaSource> = Arc::new(ServerCatalog {
            servers: Arc::clone(&servers),
        });
        let validator = SchemaValidator::new(
            config.enable_schema_cache.then(|| Arc::clone(&schema_cache)),
            source,
            config.strict_validation,
        );
        let permissions: Option<Arc<dyn PermissionEvaluator>> = config
            .enable_permissions
            .then(|| Arc::new(PermissionManager::new(config.default_permission_action)) as Arc<dyn PermissionEvaluator>);

        Self {
            config,
            servers,
            schema_cache,
            validator,
            permissions,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            closed: AtomicBool::new(false),
            keep_alive_started: AtomicBool::new(false),
        }
    }

    /// Replace the permission evaluator.
    pub fn with_permissions(mut self, evaluator: Arc<dyn PermissionEvaluator>) -> Self {
        self.permissions = Some(evaluator);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn permissions(&self) -> Option<&Arc<dyn PermissionEvaluator>> {
        self.permissions.as_ref()
    }

    pub fn schema_cache(&self) -> &Arc<SchemaCache> {
        &self.schema_cache
    }

    fn ensure_open(&self) -> Result<(), McpError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(McpError::ClientClosed);
        }
        Ok(())
    }

    fn payload_logging(&self) -> PayloadLogging {
        PayloadLogging {
            requests: self.config.enable_request_logging,
            responses: self.config.enable_response_logging,
        }
    }

    // ─── Connections ─────────────────────────────────────────────────────

    /// Connect to a server and load its tools. A no-op if already connected.
    pub async fn connect_to_server(&self, config: ServerConfig) -> Result<(), McpError> {
        self.ensure_open()?;

        let name = config.name.clone();
        if self.connection(&name).is_some_and(|c| c.is_connected()) {
            tracing::debug!(server = %name, "already connected");
            return Ok(());
        }

        let conn = Arc::new(lifecycle::connect(config, self.payload_logging()).await?);

        {
            let mut servers = self.servers.write();
            if servers.get(&name).is_some_and(|c| c.is_connected()) {
                tracing::debug!(server = %name, "lost connect race, keeping existing connection");
                return Ok(());
            }
            self.schema_cache.remove_server(&name);
            servers.insert(name.clone(), Arc::clone(&conn));
        }

        if self.config.enable_schema_cache {
            let cached = self.schema_cache.cache_tool_schemas(&name, &conn.tools());
            tracing::debug!(server = %name, schemas = cached, "cached tool schemas");
        }
        self.ensure_keep_alive();

        tracing::info!(server = %name, "connected to mcp server");
        Ok(())
    }

    /// Connect to every enabled server concurrently.
    ///
    /// Returns the servers that failed (partial startup is OK).
    pub async fn connect_all(&self, configs: &[ServerConfig]) -> Vec<(String, McpError)> {
        let attempts = configs.iter().filter(|cfg| {
            if !cfg.enabled {
                tracing::debug!(server = %cfg.name, "skipping disabled server");
            }
            cfg.enabled
        });

        let results = join_all(attempts.map(|cfg| async move {
            let outcome = self.connect_to_server(cfg.clone()).await;
            (cfg.name.clone(), outcome)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(name, outcome)| match outcome {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to connect");
                    Some((name, e))
                }
            })
            .collect()
    }

    /// Drop a connection. Unknown names are an error.
    pub async fn disconnect_from_server(&self, name: &str) -> Result<(), McpError> {
        let conn = self
            .servers
            .write()
            .remove(name)
            .ok_or_else(|| McpError::ServerNotFound {
                name: name.to_string(),
            })?;
        conn.mark_disconnected();
        self.schema_cache.remove_server(name);
        tracing::info!(server = %name, "disconnected from mcp server");
        Ok(())
    }

    fn connection(&self, name: &str) -> Option<Arc<ServerConnection>> {
        self.servers.read().get(name).cloned()
    }

    /// First connected server (by name) that exposes `tool`.
    fn owner_of(&self, tool: &str) -> Option<Arc<ServerConnection>> {
        self.servers
            .read()
            .values()
            .find(|c| c.is_connected() && c.has_tool(tool))
            .cloned()
    }

    fn ensure_keep_alive(&self) {
        let interval = self.config.keep_alive_interval;
        if interval.is_zero() || self.keep_alive_started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.tasks.spawn(lifecycle::keep_alive_loop(
            Arc::clone(&self.servers),
            interval,
            self.shutdown.clone(),
        ));
        tracing::debug!(interval_ms = interval.as_millis() as u64, "started keep-alive task");
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    /// Status snapshots of all connected servers, sorted by name.
    pub fn list_servers(&self) -> Vec<ServerInfo> {
        self.servers.read().values().map(|c| c.info()).collect()
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.connection(name).is_some_and(|c| c.is_connected())
    }

    /// Tools exposed by one server.
    pub fn list_tools(&self, server: &str) -> Result<Vec<ToolDefinition>, McpError> {
        self.connection(server)
            .map(|c| c.tools())
            .ok_or_else(|| McpError::ServerNotFound {
                name: server.to_string(),
            })
    }

    /// Tools across every connected server.
    pub fn list_all_tools(&self) -> Vec<ToolDefinition> {
        self.servers
            .read()
            .values()
            .filter(|c| c.is_connected())
            .flat_map(|c| c.tools())
            .collect()
    }

    /// Schema of the given kind. Without a server name the owning server is
    /// located first. `Ok(None)` means the tool publishes no such schema.
    pub fn get_tool_schema(
        &self,
        server: Option<&str>,
        tool: &str,
        kind: SchemaKind,
    ) -> Result<Option<Value>, McpError> {
        let conn = match server.filter(|s| !s.is_empty()) {
            Some(name) => self.connection(name).ok_or_else(|| McpError::ServerNotFound {
                name: name.to_string(),
            })?,
            None => self.owner_of(tool).ok_or_else(|| McpError::ToolNotFound {
                name: tool.to_string(),
            })?,
        };
        let definition = conn.tool(tool).ok_or_else(|| McpError::ToolNotFound {
            name: tool.to_string(),
        })?;
        Ok(definition.schema(kind).cloned())
    }

    /// Push a server's tool schemas into the shared cache.
    pub fn cache_tool_schemas(&self, server: &str, tools: &[ToolDefinition]) -> usize {
        self.schema_cache.cache_tool_schemas(server, tools)
    }

    /// Validate a value against a tool's output schema.
    pub fn validate_tool_output(&self, tool: &str, output: &Value) -> Result<(), McpError> {
        let conn = self.owner_of(tool).ok_or_else(|| McpError::ToolNotFound {
            name: tool.to_string(),
        })?;
        self.validator.validate_output(conn.name(), tool, output)
    }

    // ─── Tool Execution ──────────────────────────────────────────────────

    /// Execute a tool call on whichever server owns the tool.
    ///
    /// Only a closed client yields `Err`; every other failure is reported in
    /// the result's `error_code`.
    pub async fn call_tool(&self, request: ToolCallRequest) -> Result<ToolCallResult, McpError> {
        self.ensure_open()?;
        let start = Instant::now();
        let tool = request.name.as_str();

        // 1. Resolve owner
        let Some(conn) = self.owner_of(tool) else {
            return Ok(ToolCallResult::failure(
                tool,
                "",
                ErrorCode::ToolNotFound,
                format!("tool '{tool}' not found on any connected server"),
                start.elapsed(),
            ));
        };
        let server = conn.name().to_string();

        // 2. Authorize
        if self.config.enable_permissions {
            if let Some(evaluator) = &self.permissions {
                let caller = CallerContext::from_map(&request.context);
                match evaluator.can_execute_tool(tool, &request.arguments, &caller) {
                    Err(e) => {
                        return Ok(ToolCallResult::failure(
                            tool,
                            &server,
                            ErrorCode::PermissionError,
                            format!("permission check failed: {e}"),
                            start.elapsed(),
                        ));
                    }
                    Ok(decision) if !decision.allowed => {
                        tracing::info!(tool, server = %server, action = %decision.action, "tool call not permitted");
                        let mut denied = ToolCallResult::failure(
                            tool,
                            &server,
                            ErrorCode::PermissionDenied,
                            decision.reason,
                            start.elapsed(),
                        );
                        denied
                            .metadata
                            .insert("permissionAction".into(), json!(decision.action));
                        return Ok(denied);
                    }
                    Ok(_) => {}
                }
            }
        }

        // 3. Validate input
        if self.config.enable_input_validation {
            let arguments = Value::Object(request.arguments.clone());
            if let Err(e) = self.validator.validate_input(&server, tool, &arguments) {
                return Ok(ToolCallResult::failure(
                    tool,
                    &server,
                    ErrorCode::ValidationError,
                    e.to_string(),
                    start.elapsed(),
                ));
            }
        }

        // 4-5. Dispatch with deadline
        let timeout = request
            .timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(self.config.default_timeout);
        let wire = McpRequest::new(
            request.request_id.clone().unwrap_or_else(next_request_id),
            "tools/call",
            Some(json!({ "name": tool, "arguments": request.arguments })),
        );
        let sent = self.dispatch(&conn, &wire, timeout).await;

        // 6-7. Decode and validate output
        let mut result = ToolCallResult {
            tool_name: tool.to_string(),
            server_name: server.clone(),
            ..ToolCallResult::default()
        };
        match sent {
            Err(e) => result.fail(ErrorCode::CommunicationError, e.to_string()),
            Ok(response) => self.decode_response(&mut result, response),
        }
        result.execution_time = start.elapsed();

        // 8. Statistics
        conn.record_call(&result);
        if result.is_error {
            tracing::debug!(
                tool,
                server = %server,
                code = ?result.error_code,
                "tool call failed"
            );
        }
        Ok(result)
    }

    async fn dispatch(
        &self,
        conn: &ServerConnection,
        wire: &McpRequest,
        timeout: std::time::Duration,
    ) -> Result<McpResponse, McpError> {
        if timeout.is_zero() {
            return conn.transport().send(wire).await;
        }
        match tokio::time::timeout(timeout, conn.transport().send(wire)).await {
            Ok(sent) => sent,
            Err(_) => Err(McpError::Timeout {
                server: conn.name().to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    fn decode_response(&self, result: &mut ToolCallResult, response: McpResponse) {
        if let Some(err) = response.error {
            result.fail(ErrorCode::ServerError(err.code), err.message);
            match err.data {
                Some(Value::Object(data)) => result.metadata.extend(data),
                Some(Value::Null) | None => {}
                Some(other) => {
                    result.metadata.insert("errorData".into(), other);
                }
            }
            return;
        }

        let Some(value) = response.result else {
            result.fail(ErrorCode::ParsingError, "response carried neither result nor error");
            return;
        };

        if let Err(reason) = result.apply_payload(ToolResultPayload::decode(value)) {
            result.fail(ErrorCode::ParsingError, reason);
            return;
        }

        if !self.config.enable_output_validation || result.is_error {
            return;
        }
        let Some(structured) = result.structured_content.clone() else {
            return;
        };
        if let Err(e) = self
            .validator
            .validate_output(&result.server_name, &result.tool_name, &Value::Object(structured))
        {
            result.fail(ErrorCode::OutputValidationError, e.to_string());
        }
    }

    // ─── Shutdown ────────────────────────────────────────────────────────

    /// Stop background tasks, wait for them, and drop every connection.
    ///
    /// In-flight calls holding a connection finish on their own.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        let drained: Vec<Arc<ServerConnection>> = {
            let mut servers = self.servers.write();
            let drained = servers.values().cloned().collect();
            servers.clear();
            drained
        };
        for conn in &drained {
            conn.mark_disconnected();
            self.schema_cache.remove_server(conn.name());
        }
        tracing::info!(servers = drained.len(), "mcp client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
