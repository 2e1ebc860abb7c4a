//! Mock MCP server
//!
//! Speaks the JSON-RPC-over-HTTP shape the client uses: `ping`,
//! `tools/list` and `tools/call` on `POST /mcp`. Each tool exercises one
//! branch of the client's call pipeline.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use ryan_mcp::mcp_client::ServerConfig;
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// How long the `slow` tool sleeps before answering.
pub const SLOW_TOOL_DELAY: Duration = Duration::from_millis(500);

/// Optional deviations from the well-behaved server.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockBehavior {
    /// `tools/list` always fails.
    pub fail_listing: bool,
    /// `ping` answers `{"result": null, "error": null}`.
    pub null_ping: bool,
    /// The first `ping` received sleeps this long before answering.
    pub first_ping_delay: Option<Duration>,
}

#[derive(Default)]
struct MockState {
    headers: Mutex<Vec<HeaderMap>>,
    calls: AtomicUsize,
    pings: AtomicUsize,
    hide_schemas: AtomicBool,
    behavior: MockBehavior,
}

/// A mock server on a random local port. Shuts down when dropped.
pub struct MockServer {
    pub url: String,
    state: Arc<MockState>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl MockServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(MockBehavior::default()).await
    }

    /// A server whose `tools/list` always fails.
    pub async fn spawn_without_tools() -> Self {
        Self::spawn_with(MockBehavior {
            fail_listing: true,
            ..MockBehavior::default()
        })
        .await
    }

    pub async fn spawn_with(behavior: MockBehavior) -> Self {
        let state = Arc::new(MockState {
            behavior,
            ..MockState::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let app = Router::new()
            .route("/mcp", post(handle))
            .with_state(Arc::clone(&state));

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        Self {
            url: format!("http://127.0.0.1:{port}/mcp"),
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn server_config(&self, name: &str) -> ServerConfig {
        ServerConfig::new(name, &self.url)
    }

    /// Number of `tools/call` requests received.
    pub fn call_count(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Later tool listings carry no input or output schemas.
    pub fn stop_publishing_schemas(&self) {
        self.state.hide_schemas.store(true, Ordering::SeqCst);
    }

    /// Value of `header` on the most recent request.
    pub fn last_header(&self, header: &str) -> Option<String> {
        self.state
            .headers
            .lock()
            .last()
            .and_then(|h| h.get(header))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Json<Value> {
    state.headers.lock().push(headers);
    let id = request["id"].clone();

    let reply = match request["method"].as_str().unwrap_or_default() {
        "ping" => {
            let first = state.pings.fetch_add(1, Ordering::SeqCst) == 0;
            if let (true, Some(delay)) = (first, state.behavior.first_ping_delay) {
                tokio::time::sleep(delay).await;
            }
            if state.behavior.null_ping {
                return Json(json!({"result": null, "error": null, "id": id}));
            }
            Ok(json!({}))
        }
        "tools/list" if state.behavior.fail_listing => {
            Err(json!({"code": -32601, "message": "no tools"}))
        }
        "tools/list" => {
            let mut tools = tool_listing();
            if state.hide_schemas.load(Ordering::SeqCst) {
                strip_schemas(&mut tools);
            }
            Ok(json!({ "tools": tools }))
        }
        "tools/call" => {
            state.calls.fetch_add(1, Ordering::SeqCst);
            call(&request["params"]).await
        }
        other => Err(json!({"code": -32601, "message": format!("unknown method {other}")})),
    };

    Json(match reply {
        Ok(result) => json!({"result": result, "id": id}),
        Err(error) => json!({"error": error, "id": id}),
    })
}

fn tool_listing() -> Value {
    json!([
        {
            "name": "echo",
            "description": "Echo a message back",
            "inputSchema": {
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            },
            "outputSchema": {
                "type": "object",
                "properties": {"echo": {"type": "string"}},
                "required": ["echo"]
            }
        },
        {
            "name": "bad_output",
            "description": "Returns structured content that breaks its own schema",
            "outputSchema": {
                "type": "object",
                "properties": {"count": {"type": "integer"}},
                "required": ["count"]
            }
        },
        {"name": "explode", "description": "Always fails with a protocol error"},
        {"name": "number", "description": "Returns a bare number"},
        {"name": "tool_error", "description": "Reports an error in its result"},
        {"name": "slow", "description": "Answers after a delay"},
        {"name": "read_file", "description": "Pretends to read a file"}
    ])
}

fn strip_schemas(tools: &mut Value) {
    for tool in tools.as_array_mut().into_iter().flatten() {
        if let Some(tool) = tool.as_object_mut() {
            tool.remove("inputSchema");
            tool.remove("outputSchema");
        }
    }
}

async fn call(params: &Value) -> Result<Value, Value> {
    let arguments = &params["arguments"];
    match params["name"].as_str().unwrap_or_default() {
        "echo" => {
            let message = arguments["message"].as_str().unwrap_or_default();
            Ok(json!({
                "content": message,
                "structuredContent": {"echo": message},
                "metadata": {"echoed": true}
            }))
        }
        "bad_output" => Ok(json!({"structuredContent": {"count": "many"}})),
        "explode" => Err(json!({
            "code": -32000,
            "message": "tool exploded",
            "data": {"retryAfter": 5}
        })),
        "number" => Ok(json!(42)),
        "tool_error" => Ok(json!({
            "isError": true,
            "errorCode": "DISK_FULL",
            "errorDetail": "no space left"
        })),
        "slow" => {
            tokio::time::sleep(SLOW_TOOL_DELAY).await;
            Ok(json!("finally"))
        }
        "read_file" => Ok(json!({
            "content": [{"type": "text", "content": "file body"}]
        })),
        other => Err(json!({"code": -32602, "message": format!("unknown tool {other}")})),
    }
}
