//! MCP over HTTP transport.
//!
//! One POST per logical call: the request envelope is the JSON body and the
//! response envelope is the JSON reply. Authentication is applied per request.

use reqwest::{Client as HttpClient, RequestBuilder};
use serde_json::Value;
use uuid::Uuid;

use super::errors::McpError;
use super::types::{error_codes, AuthType, McpRequest, McpResponse, ServerConfig};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Header used for `apikey` auth when the credentials don't name one.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Generate a unique request ID.
pub fn next_request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Which payloads get logged at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadLogging {
    pub requests: bool,
    pub responses: bool,
}

/// HTTP transport dedicated to one server.
#[derive(Debug)]
pub struct HttpTransport {
    config: ServerConfig,
    http: HttpClient,
    logging: PayloadLogging,
}

impl HttpTransport {
    /// Build a transport with its own HTTP client honouring the server timeout.
    pub fn new(config: &ServerConfig, logging: PayloadLogging) -> Result<Self, McpError> {
        let mut builder = HttpClient::builder();
        if !config.timeout.is_zero() {
            builder = builder.timeout(config.timeout);
        }
        let http = builder.build().map_err(|e| McpError::TransportError {
            server: config.name.clone(),
            reason: format!("failed to build HTTP client: {e}"),
        })?;

        Ok(Self {
            config: config.clone(),
            http,
            logging,
        })
    }

    /// Send a request with a freshly generated ID.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<McpResponse, McpError> {
        self.send(&McpRequest::new(next_request_id(), method, params))
            .await
    }

    /// POST a request envelope and decode the response envelope.
    pub async fn send(&self, request: &McpRequest) -> Result<McpResponse, McpError> {
        let server = &self.config.name;

        if self.logging.requests {
            tracing::debug!(
                server = %server,
                method = %request.method,
                id = %request.id,
                params = ?request.params,
                "mcp request"
            );
        }

        let builder = self.http.post(&self.config.url).json(request);
        let builder = apply_authentication(builder, &self.config);

        let response = builder.send().await.map_err(|e| McpError::TransportError {
            server: server.clone(),
            reason: format!("HTTP request failed: {e}"),
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| McpError::TransportError {
            server: server.clone(),
            reason: format!("failed to read response body: {e}"),
        })?;

        let decoded: McpResponse =
            serde_json::from_slice(&body).map_err(|e| McpError::TransportError {
                server: server.clone(),
                reason: format!("failed to parse response (HTTP {status}): {e}"),
            })?;

        if self.logging.responses {
            tracing::debug!(
                server = %server,
                id = %request.id,
                status = status.as_u16(),
                has_error = decoded.error.is_some(),
                result = ?decoded.result,
                "mcp response"
            );
        }

        Ok(decoded)
    }
}

// ─── Authentication ──────────────────────────────────────────────────────────

/// Attach credentials according to the server's auth type.
///
/// Missing credential keys leave the request untouched.
pub fn apply_authentication(builder: RequestBuilder, config: &ServerConfig) -> RequestBuilder {
    let creds = &config.credentials;
    match config.auth_type {
        AuthType::Bearer => match creds.get("token") {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        },
        AuthType::Basic => match (creds.get("username"), creds.get("password")) {
            (Some(user), Some(pass)) => builder.basic_auth(user, Some(pass)),
            _ => builder,
        },
        AuthType::ApiKey => match creds.get("key") {
            Some(key) => {
                let header = creds
                    .get("header")
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_API_KEY_HEADER);
                builder.header(header, key)
            }
            None => builder,
        },
        AuthType::None | AuthType::Unknown => builder,
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a response, converting errors to `McpError`.
pub fn extract_result(response: McpResponse) -> Result<Value, McpError> {
    check_error(response)?.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

/// Fail only on a reported protocol error. The result may be absent or null.
pub fn check_error(response: McpResponse) -> Result<Option<Value>, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }
    Ok(response.result)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
