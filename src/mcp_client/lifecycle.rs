//! Server connection lifecycle.
//!
//! A `ServerConnection` holds the runtime state for one remote server: its
//! transport, a status snapshot with call statistics, and the tools it
//! advertised. Connecting is a two-step handshake (`ping`, then
//! `tools/list`); a failed listing leaves the server connected with no tools.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::errors::McpError;
use super::transport::{check_error, extract_result, HttpTransport, PayloadLogging};
use super::types::{ServerConfig, ServerInfo, ServerStatus, ToolCallResult, ToolDefinition, ToolsListResult};

/// Shared map of live connections, keyed by server name.
pub type ConnectionMap = Arc<RwLock<BTreeMap<String, Arc<ServerConnection>>>>;

// ─── ServerConnection ────────────────────────────────────────────────────────

#[derive(Debug)]
struct ConnectionState {
    connected: bool,
    info: ServerInfo,
}

/// Runtime state for one connected server.
#[derive(Debug)]
pub struct ServerConnection {
    config: ServerConfig,
    transport: HttpTransport,
    state: RwLock<ConnectionState>,
    tools: RwLock<HashMap<String, ToolDefinition>>,
}

impl ServerConnection {
    /// Create a connection in the `connecting` state. No I/O happens here.
    pub fn new(config: ServerConfig, logging: PayloadLogging) -> Result<Self, McpError> {
        let transport = HttpTransport::new(&config, logging)?;
        let info = ServerInfo::new(&config);
        Ok(Self {
            config,
            transport,
            state: RwLock::new(ConnectionState {
                connected: false,
                info,
            }),
            tools: RwLock::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    /// Snapshot of status and counters.
    pub fn info(&self) -> ServerInfo {
        self.state.read().info.clone()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn tool(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.read().get(name).cloned()
    }

    /// All tools, sorted by name.
    pub fn tools(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> = self.tools.read().values().cloned().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    // ─── Handshake ───────────────────────────────────────────────────────

    /// Send a `ping` and record the round-trip time.
    ///
    /// Only an `error` in the reply fails the ping; any result, null
    /// included, counts as alive.
    pub async fn ping(&self) -> Result<Duration, McpError> {
        let start = Instant::now();
        let response = self.transport.request("ping", None).await?;
        check_error(response)?;
        let elapsed = start.elapsed();
        self.record_ping(elapsed);
        Ok(elapsed)
    }

    /// Fetch `tools/list` and replace the tool map.
    pub async fn load_tools(&self) -> Result<usize, McpError> {
        let response = self.transport.request("tools/list", None).await?;
        let result = extract_result(response)?;
        let listing: ToolsListResult = serde_json::from_value(result)?;

        let mut tools = HashMap::with_capacity(listing.tools.len());
        for mut tool in listing.tools {
            tool.server_name = self.config.name.clone();
            tool.server_url = self.config.url.clone();
            tools.insert(tool.name.clone(), tool);
        }
        let count = tools.len();
        *self.tools.write() = tools;
        self.state.write().info.available_tools = count;
        Ok(count)
    }

    pub fn mark_connected(&self) {
        let mut state = self.state.write();
        state.connected = true;
        state.info.status = ServerStatus::Connected;
        state.info.connected_at = Some(Utc::now());
    }

    pub fn mark_disconnected(&self) {
        let mut state = self.state.write();
        state.connected = false;
        state.info.status = ServerStatus::Disconnected;
    }

    // ─── Statistics ──────────────────────────────────────────────────────

    /// Fold one completed call into the counters and running latency average.
    pub fn record_call(&self, result: &ToolCallResult) {
        let mut state = self.state.write();
        let info = &mut state.info;

        info.total_calls += 1;
        if result.is_error {
            info.failed_calls += 1;
            info.last_error = result.error_detail.clone();
            info.last_error_time = Some(Utc::now());
        } else {
            info.successful_calls += 1;
        }

        let n = u128::from(info.total_calls);
        let avg = info.average_latency.as_nanos();
        let latest = result.execution_time.as_nanos();
        let next = (avg * (n - 1) + latest) / n;
        info.average_latency = Duration::from_nanos(u64::try_from(next).unwrap_or(u64::MAX));
    }

    fn record_ping(&self, elapsed: Duration) {
        let mut state = self.state.write();
        state.info.last_ping = Some(Utc::now());
        state.info.response_time = elapsed;
        if state.connected {
            state.info.status = ServerStatus::Connected;
        }
    }

    fn record_ping_failure(&self, error: &McpError) {
        let mut state = self.state.write();
        state.info.status = ServerStatus::Error;
        state.info.last_error = Some(error.to_string());
        state.info.last_error_time = Some(Utc::now());
    }
}

// ─── Connecting ──────────────────────────────────────────────────────────────

/// Build a connection and run the ping + tools/list handshake.
pub async fn connect(
    config: ServerConfig,
    logging: PayloadLogging,
) -> Result<ServerConnection, McpError> {
    let name = config.name.clone();
    let conn = ServerConnection::new(config, logging)?;

    conn.ping().await.map_err(|e| McpError::ConnectFailed {
        name: name.clone(),
        reason: e.to_string(),
    })?;

    match conn.load_tools().await {
        Ok(count) => tracing::info!(server = %name, tools = count, "loaded tools"),
        Err(e) => tracing::warn!(server = %name, error = %e, "failed to load tools"),
    }

    conn.mark_connected();
    Ok(conn)
}

// ─── Keep-Alive ──────────────────────────────────────────────────────────────

/// Ping every keep-alive server on each tick until cancelled.
pub async fn keep_alive_loop(servers: ConnectionMap, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; servers were just pinged on connect.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let targets: Vec<Arc<ServerConnection>> = servers
            .read()
            .values()
            .filter(|c| c.config.keep_alive && c.is_connected())
            .cloned()
            .collect();

        for conn in targets {
            if let Err(e) = conn.ping().await {
                tracing::warn!(server = %conn.name(), error = %e, "keep-alive ping failed");
                conn.record_ping_failure(&e);
            }
        }
    }

    tracing::debug!("keep-alive loop stopped");
}

// ─── Tests ───────────────────────────────────────────────────────────────────
