//! Common test infrastructure
//!
//! Tests import from this module only.
//!
//! ```no_run
//! mod common;
//! use common::MockServer;
//!
//! #[tokio::test]
//! async fn test_ping() {
//!     let server = MockServer::spawn().await;
//!     let config = server.server_config("mock");
//! }
//! ```

mod server;

pub use server::{MockBehavior, MockServer, SLOW_TOOL_DELAY};

use ryan_mcp::mcp_client::ClientConfig;
use ryan_mcp::permissions::PermissionAction;
use serde_json::{Map, Value};

/// Client config that allows every call, so tests reach the wire.
#[allow(dead_code)]
pub fn permissive_config() -> ClientConfig {
    ClientConfig {
        default_permission_action: PermissionAction::Allow,
        ..ClientConfig::default()
    }
}

/// Build an argument map from a `json!` object.
#[allow(dead_code)]
pub fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
