//! MCP client: JSON-RPC over HTTP to remote tool servers.
//!
//! This module handles:
//! - Server discovery from files and environment variables
//! - Connecting, pinging and listing tools on each server
//! - Tool call routing with permission checks and schema validation
//! - Per-server call statistics and background keep-alive

pub mod client;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod lifecycle;
pub mod schema;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use config::ClientConfig;
pub use discovery::ServerDiscovery;
pub use errors::McpError;
pub use schema::{CacheStats, SchemaCache, SchemaKey, SchemaValidator, ToolValidator};
pub use types::{
    AuthType, ErrorCode, SchemaKind, ServerConfig, ServerInfo, ServerStatus, ToolCallRequest,
    ToolCallResult, ToolDefinition,
};
