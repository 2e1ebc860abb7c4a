//! MCP Client error types.
//!
//! These are the returned-error channel. Failures that are a normal outcome
//! of attempting a tool call travel inside `ToolCallResult` instead.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// No server with this name is registered or connected.
    #[error("server not found: '{name}'")]
    ServerNotFound { name: String },

    /// No connected server exposes this tool.
    #[error("tool not found: '{name}'")]
    ToolNotFound { name: String },

    /// The ping handshake failed while connecting.
    #[error("failed to connect to server '{name}': {reason}")]
    ConnectFailed { name: String, reason: String },

    /// HTTP-level failure (request build, send, body decode).
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// The request did not complete within its deadline.
    #[error("request to server '{server}' timed out after {timeout_ms}ms")]
    Timeout { server: String, timeout_ms: u64 },

    /// Server returned a protocol error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A schema document could not be compiled.
    #[error("invalid {kind} schema for '{tool}': {reason}")]
    SchemaError {
        tool: String,
        kind: String,
        reason: String,
    },

    /// A value did not satisfy its schema.
    #[error("{kind} validation failed for '{tool}': {}", errors.join("; "))]
    ValidationFailed {
        tool: String,
        kind: String,
        errors: Vec<String>,
    },

    /// Configuration error (bad file, bad env var).
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// The client has been closed.
    #[error("client is closed")]
    ClientClosed,

    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for McpError {
    fn from(e: serde_json::Error) -> Self {
        McpError::SerializationError {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_failed_message_joins_errors() {
        let err = McpError::ValidationFailed {
            tool: "echo".into(),
            kind: "input".into(),
            errors: vec!["a is required".into(), "b is not a string".into()],
        };
        assert_eq!(
            err.to_string(),
            "input validation failed for 'echo': a is required; b is not a string"
        );
    }

    #[test]
    fn test_from_serde_json_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: McpError = parse_err.into();
        assert!(matches!(err, McpError::SerializationError { .. }));
    }
}
