//! Shared types for the MCP client.
//!
//! Wire messages, tool and server descriptions, and the tool-call result model.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

// ─── Wire Protocol ──────────────────────────────────────────────────────────

/// MCP request envelope, one per HTTP POST.
#[derive(Debug, Clone, Serialize)]
pub struct McpRequest {
    pub method: String,
    pub params: Option<Value>,
    pub id: String,
}

impl McpRequest {
    /// Create a new MCP request.
    pub fn new(id: impl Into<String>, method: &str, params: Option<Value>) -> Self {
        Self {
            method: method.to_string(),
            params,
            id: id.into(),
        }
    }
}

/// MCP response envelope. A present `error` always supersedes `result`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<McpErrorObject>,
    #[serde(default)]
    pub id: Option<Value>,
}

/// Protocol-level error reported by a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

// ─── Durations ──────────────────────────────────────────────────────────────

/// Serialize a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis.unwrap_or(0)))
    }
}

// ─── Server Configuration ───────────────────────────────────────────────────

/// How requests to a server are authenticated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    None,
    Bearer,
    Basic,
    #[serde(rename = "apikey")]
    ApiKey,
    /// Any scheme this client does not understand; adds nothing.
    #[serde(other)]
    Unknown,
}

impl AuthType {
    /// Parse a scheme name the way discovery sources spell it.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Self::None,
            "bearer" => Self::Bearer,
            "basic" => Self::Basic,
            "apikey" | "api_key" => Self::ApiKey,
            _ => Self::Unknown,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Static description of a remote tool server.
///
/// `retry_attempts`, `retry_delay` and `max_connections` are carried and
/// defaulted but not enforced by the call path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, with = "duration_ms")]
    pub timeout: Duration,
    #[serde(default)]
    pub retry_attempts: u32,
    #[serde(default, with = "duration_ms")]
    pub retry_delay: Duration,
    #[serde(default)]
    pub keep_alive: bool,
    #[serde(default)]
    pub max_connections: u32,
    #[serde(default, skip_serializing_if = "is_no_auth")]
    pub auth_type: AuthType,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub credentials: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_features: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn is_no_auth(auth: &AuthType) -> bool {
    *auth == AuthType::None
}

impl ServerConfig {
    /// Minimal enabled config with every optional field left unset.
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            timeout: Duration::ZERO,
            retry_attempts: 0,
            retry_delay: Duration::ZERO,
            keep_alive: false,
            max_connections: 0,
            auth_type: AuthType::None,
            credentials: HashMap::new(),
            supported_features: Vec::new(),
            enabled: true,
            metadata: Map::new(),
        }
    }
}

// ─── Tools ──────────────────────────────────────────────────────────────────

/// Which of a tool's two schemas is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    Input,
    Output,
}

impl SchemaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MCP tool definition as returned by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Filled in by the client from the owning connection.
    #[serde(default)]
    pub server_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_url: String,
}

impl ToolDefinition {
    /// The schema of the requested kind, if the server published one.
    pub fn schema(&self, kind: SchemaKind) -> Option<&Value> {
        match kind {
            SchemaKind::Input => self.input_schema.as_ref(),
            SchemaKind::Output => self.output_schema.as_ref(),
        }
    }
}

/// Payload of a `tools/list` result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

// ─── Server Runtime Info ────────────────────────────────────────────────────

/// Connection state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// Snapshot of a connected server: status, timestamps and call counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub url: String,
    pub status: ServerStatus,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_ping: Option<DateTime<Utc>>,
    #[serde(with = "duration_ms")]
    pub response_time: Duration,
    pub version: Option<String>,
    pub supported_features: Vec<String>,
    pub available_tools: usize,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    #[serde(with = "duration_ms")]
    pub average_latency: Duration,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
}

impl ServerInfo {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            status: ServerStatus::Connecting,
            connected_at: None,
            last_ping: None,
            response_time: Duration::ZERO,
            version: None,
            supported_features: config.supported_features.clone(),
            available_tools: 0,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            average_latency: Duration::ZERO,
            last_error: None,
            last_error_time: None,
        }
    }
}

// ─── Tool Calls ─────────────────────────────────────────────────────────────

/// A request to invoke a tool on whichever server owns it.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
    /// Caller context (`sessionId`, `projectRoot`, `userId`, ...).
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

impl ToolCallRequest {
    pub fn new(name: &str, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.to_string(),
            arguments,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_request_id(mut self, id: &str) -> Self {
        self.request_id = Some(id.to_string());
        self
    }

    pub fn with_context(mut self, key: &str, value: Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }
}

/// A single item of an array-shaped tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, alias = "text", skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Error codes carried inside a `ToolCallResult`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    ToolNotFound,
    PermissionDenied,
    PermissionError,
    ValidationError,
    CommunicationError,
    /// A protocol error reported by the server, with its numeric code.
    ServerError(i64),
    ParsingError,
    OutputValidationError,
    /// A code reported by the tool itself.
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            Self::ToolNotFound => Cow::Borrowed("TOOL_NOT_FOUND"),
            Self::PermissionDenied => Cow::Borrowed("PERMISSION_DENIED"),
            Self::PermissionError => Cow::Borrowed("PERMISSION_ERROR"),
            Self::ValidationError => Cow::Borrowed("VALIDATION_ERROR"),
            Self::CommunicationError => Cow::Borrowed("COMMUNICATION_ERROR"),
            Self::ServerError(code) => Cow::Owned(format!("SERVER_ERROR_{code}")),
            Self::ParsingError => Cow::Borrowed("PARSING_ERROR"),
            Self::OutputValidationError => Cow::Borrowed("OUTPUT_VALIDATION_ERROR"),
            Self::Other(code) => Cow::Borrowed(code),
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "TOOL_NOT_FOUND" => Self::ToolNotFound,
            "PERMISSION_DENIED" => Self::PermissionDenied,
            "PERMISSION_ERROR" => Self::PermissionError,
            "VALIDATION_ERROR" => Self::ValidationError,
            "COMMUNICATION_ERROR" => Self::CommunicationError,
            "PARSING_ERROR" => Self::ParsingError,
            "OUTPUT_VALIDATION_ERROR" => Self::OutputValidationError,
            other => match other
                .strip_prefix("SERVER_ERROR_")
                .and_then(|code| code.parse::<i64>().ok())
            {
                Some(code) => Self::ServerError(code),
                None => Self::Other(other.to_string()),
            },
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl PartialEq<&str> for ErrorCode {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Outcome of a tool call. Failures are carried as data, never raised.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub content_array: Vec<ContentItem>,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(with = "duration_ms")]
    pub execution_time: Duration,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Result fields the decoder did not recognise, kept verbatim.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub unrecognized: Map<String, Value>,
    pub tool_name: String,
    pub server_name: String,
}

impl ToolCallResult {
    /// A failed result with the given code and detail.
    pub fn failure(
        tool_name: &str,
        server_name: &str,
        code: ErrorCode,
        detail: impl Into<String>,
        execution_time: Duration,
    ) -> Self {
        Self {
            is_error: true,
            error_code: Some(code),
            error_detail: Some(detail.into()),
            execution_time,
            tool_name: tool_name.to_string(),
            server_name: server_name.to_string(),
            ..Self::default()
        }
    }

    /// Turn this result into a failure, keeping any content already decoded.
    pub fn fail(&mut self, code: ErrorCode, detail: impl Into<String>) {
        self.is_error = true;
        self.error_code = Some(code);
        self.error_detail = Some(detail.into());
    }

    /// Overwrite the content fields from a decoded payload.
    ///
    /// Returns an error message when the payload shape is not understood.
    pub fn apply_payload(&mut self, payload: ToolResultPayload) -> Result<(), String> {
        match payload {
            ToolResultPayload::Text(text) => {
                self.content = Some(text);
                Ok(())
            }
            ToolResultPayload::Structured(structured) => {
                self.content = structured.content;
                self.structured_content = structured.structured_content;
                self.content_array = structured.content_array;
                self.is_error = structured.is_error;
                self.error_code = structured.error_code.as_deref().map(ErrorCode::parse);
                self.error_detail = structured.error_detail;
                self.metadata.extend(structured.metadata);
                self.unrecognized = structured.unrecognized;
                Ok(())
            }
            ToolResultPayload::Unrecognized(value) => {
                Err(format!("unexpected result type: {}", json_type_name(&value)))
            }
        }
    }
}

// ─── Result Decoding ────────────────────────────────────────────────────────

/// The shapes a `tools/call` result may take on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResultPayload {
    /// A bare string result.
    Text(String),
    /// An object with some of the known result fields.
    Structured(StructuredResult),
    /// Anything else (numbers, arrays, booleans, null).
    Unrecognized(Value),
}

/// Decoded object-shaped result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredResult {
    pub content: Option<String>,
    pub structured_content: Option<Map<String, Value>>,
    pub content_array: Vec<ContentItem>,
    pub is_error: bool,
    pub error_code: Option<String>,
    pub error_detail: Option<String>,
    pub metadata: Map<String, Value>,
    /// Unknown keys and known keys whose values had an unexpected type.
    pub unrecognized: Map<String, Value>,
}

impl ToolResultPayload {
    /// Recognise each known result shape; nothing is silently dropped.
    pub fn decode(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text),
            Value::Object(map) => Self::Structured(StructuredResult::from_map(map)),
            other => Self::Unrecognized(other),
        }
    }
}

impl StructuredResult {
    fn from_map(map: Map<String, Value>) -> Self {
        let mut out = Self::default();
        for (key, value) in map {
            match (key.as_str(), value) {
                ("content", Value::String(text)) => out.content = Some(text),
                // Standard MCP servers send `content` as an item array.
                ("content" | "contentArray", Value::Array(items)) => {
                    out.push_items(&key, items);
                }
                ("structuredContent", Value::Object(obj)) => out.structured_content = Some(obj),
                ("isError", Value::Bool(flag)) => out.is_error = flag,
                ("errorCode", Value::String(code)) => out.error_code = Some(code),
                ("errorDetail", Value::String(detail)) => out.error_detail = Some(detail),
                ("metadata", Value::Object(obj)) => out.metadata = obj,
                (_, Value::Null) => {}
                (_, other) => {
                    out.unrecognized.insert(key.clone(), other);
                }
            }
        }
        out
    }

    fn push_items(&mut self, key: &str, items: Vec<Value>) {
        let mut rejected = Vec::new();
        for item in items {
            match serde_json::from_value::<ContentItem>(item.clone()) {
                Ok(parsed) if item.is_object() => self.content_array.push(parsed),
                _ => rejected.push(item),
            }
        }
        if !rejected.is_empty() {
            self.unrecognized
                .insert(key.to_string(), Value::Array(rejected));
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Standard MCP Error Codes ────────────────────────────────────────────────

/// Well-known JSON-RPC / MCP error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
