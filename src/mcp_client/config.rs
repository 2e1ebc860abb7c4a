//! Client configuration loading.
//!
//! `ClientConfig` is read from YAML. String values may reference environment
//! variables as `${VAR}` or `${VAR:-default}`. Durations are written as
//! integer milliseconds under `*_ms` keys.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::errors::McpError;
use super::types::duration_ms;
use crate::permissions::PermissionAction;

// ─── ClientConfig ────────────────────────────────────────────────────────────

/// Runtime options for `McpClient`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Applied to calls whose request carries no timeout.
    #[serde(rename = "default_timeout_ms", default = "default_timeout", with = "duration_ms")]
    pub default_timeout: Duration,
    /// Carried for callers that implement retries; the client does not retry.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(rename = "retry_delay_ms", default = "default_retry_delay", with = "duration_ms")]
    pub retry_delay: Duration,
    /// Keep-alive ping period. Zero disables the background task.
    #[serde(rename = "keep_alive_interval_ms", default, with = "duration_ms")]
    pub keep_alive_interval: Duration,

    #[serde(default = "default_true")]
    pub enable_schema_cache: bool,
    #[serde(default = "default_schema_cache_size")]
    pub schema_cache_size: usize,
    #[serde(rename = "schema_cache_ttl_ms", default = "default_schema_cache_ttl", with = "duration_ms")]
    pub schema_cache_ttl: Duration,

    #[serde(default = "default_true")]
    pub enable_permissions: bool,
    /// Decision when no rule matches.
    #[serde(default)]
    pub default_permission_action: PermissionAction,

    #[serde(default = "default_true")]
    pub enable_input_validation: bool,
    #[serde(default = "default_true")]
    pub enable_output_validation: bool,
    /// Treat a tool without a schema as a validation failure.
    #[serde(default)]
    pub strict_validation: bool,

    #[serde(default)]
    pub enable_request_logging: bool,
    #[serde(default)]
    pub enable_response_logging: bool,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_true() -> bool {
    true
}

fn default_schema_cache_size() -> usize {
    100
}

fn default_schema_cache_ttl() -> Duration {
    Duration::from_secs(30 * 60)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_timeout(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay: default_retry_delay(),
            keep_alive_interval: Duration::ZERO,
            enable_schema_cache: true,
            schema_cache_size: default_schema_cache_size(),
            schema_cache_ttl: default_schema_cache_ttl(),
            enable_permissions: true,
            default_permission_action: PermissionAction::default(),
            enable_input_validation: true,
            enable_output_validation: true,
            strict_validation: false,
            enable_request_logging: false,
            enable_response_logging: false,
        }
    }
}

impl ClientConfig {
    /// Load a YAML config file, interpolating environment variables first.
    pub fn load(path: &Path) -> Result<Self, McpError> {
        let raw = std::fs::read_to_string(path).map_err(|e| McpError::ConfigError {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse YAML text. An empty document yields the defaults.
    pub fn from_yaml(raw: &str) -> Result<Self, McpError> {
        let interpolated = interpolate_env_vars(raw);
        if interpolated.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&interpolated).map_err(|e| McpError::ConfigError {
            reason: format!("failed to parse client config: {e}"),
        })
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&resolve_var_expr(&after[..end]));
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated reference: keep it literally.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, fallback)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(fallback)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
