//! Server discovery: build the server registry from files and environment.
//!
//! Sources are unioned in a fixed order and later sources overwrite earlier
//! entries with the same name:
//!
//! 1. JSON files at the search paths (project-local, user-global, system-wide)
//! 2. `RYAN_MCP_SERVERS`, a JSON array of server configs
//! 3. `RYAN_MCP_SERVER_<NAME>_<PROPERTY>` variables (`URL`, `AUTH`, `CRED_<key>`)
//! 4. `<project_root>/.ryan/mcp-project.json`, when a project root is set
//!
//! The registry lives in memory. Writing it back to disk is an explicit call.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::config::expand_tilde;
use super::errors::McpError;
use super::types::{AuthType, ServerConfig};

/// Aggregate variable holding a JSON array of server configs.
pub const AGGREGATE_ENV_VAR: &str = "RYAN_MCP_SERVERS";

/// Prefix of the per-server variables.
pub const SERVER_ENV_PREFIX: &str = "RYAN_MCP_SERVER_";

/// Project configuration file, relative to the project root.
pub const PROJECT_CONFIG_FILE: &str = ".ryan/mcp-project.json";

const FILE_FORMAT_VERSION: &str = "1.0";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Search paths in the order they are applied.
pub fn default_search_paths() -> Vec<PathBuf> {
    [
        "./.ryan/mcp-servers.json",
        "~/.ryan/mcp-servers.json",
        "/etc/ryan/mcp-servers.json",
    ]
    .iter()
    .map(|p| PathBuf::from(expand_tilde(p)))
    .collect()
}

/// On-disk shape of a discovery file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ServerFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default)]
    servers: Vec<ServerConfig>,
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// In-memory registry of known servers, filled by [`discover_servers`].
///
/// [`discover_servers`]: ServerDiscovery::discover_servers
pub struct ServerDiscovery {
    servers: RwLock<HashMap<String, ServerConfig>>,
    search_paths: Vec<PathBuf>,
    project_root: Option<PathBuf>,
}

impl Default for ServerDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerDiscovery {
    pub fn new() -> Self {
        Self::with_search_paths(default_search_paths())
    }

    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            search_paths,
            project_root: None,
        }
    }

    /// Enable the project source rooted at `root`.
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Run every source, merge by name and replace the registry contents.
    ///
    /// Unreadable or malformed sources are logged and skipped. Returns the
    /// merged configs sorted by name.
    pub fn discover_servers(&self) -> Vec<ServerConfig> {
        let mut merged: HashMap<String, ServerConfig> = HashMap::new();

        for path in &self.search_paths {
            if !path.exists() {
                continue;
            }
            match load_servers_from_file(path) {
                Ok(servers) => {
                    tracing::debug!(path = %path.display(), count = servers.len(), "loaded server file");
                    merged = merge_configs(merged, by_name(servers));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to load server file");
                }
            }
        }

        merged = merge_configs(merged, by_name(servers_from_aggregate_env()));
        merged = merge_configs(merged, by_name(servers_from_env_vars(std::env::vars())));

        if let Some(root) = &self.project_root {
            let path = root.join(PROJECT_CONFIG_FILE);
            if path.exists() {
                match load_servers_from_file(&path) {
                    Ok(servers) => merged = merge_configs(merged, by_name(servers)),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to load project servers");
                    }
                }
            }
        }

        for config in merged.values_mut() {
            apply_defaults(config);
        }

        let mut list: Vec<ServerConfig> = merged.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));

        *self.servers.write() = merged;
        tracing::info!(count = list.len(), "server discovery complete");
        list
    }

    /// Add or replace one server. Defaults are filled in.
    pub fn register_server(&self, mut config: ServerConfig) {
        apply_defaults(&mut config);
        tracing::info!(server = %config.name, url = %config.url, "registered server");
        self.servers.write().insert(config.name.clone(), config);
    }

    /// Remove a server. Returns whether it was present.
    pub fn unregister_server(&self, name: &str) -> bool {
        let removed = self.servers.write().remove(name).is_some();
        if removed {
            tracing::info!(server = %name, "unregistered server");
        }
        removed
    }

    pub fn get_server_config(&self, name: &str) -> Result<ServerConfig, McpError> {
        self.servers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::ServerNotFound {
                name: name.to_string(),
            })
    }

    /// Every registered server, sorted by name.
    pub fn list_registered_servers(&self) -> Vec<ServerConfig> {
        let mut list: Vec<ServerConfig> = self.servers.read().values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Write the registry to `path` as a version 1.0 discovery file.
    pub fn save_server_configuration(&self, path: &Path) -> Result<(), McpError> {
        let file = ServerFile {
            version: Some(FILE_FORMAT_VERSION.to_string()),
            servers: self.list_registered_servers(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        write_private(path, &content)?;
        tracing::info!(path = %path.display(), count = file.servers.len(), "saved server configuration");
        Ok(())
    }
}

// ─── Sources ─────────────────────────────────────────────────────────────────

/// Parse one discovery file. Every returned config has defaults applied.
pub fn load_servers_from_file(path: &Path) -> Result<Vec<ServerConfig>, McpError> {
    let raw = std::fs::read_to_string(path)?;
    let mut file: ServerFile = serde_json::from_str(&raw).map_err(|e| McpError::ConfigError {
        reason: format!("{}: {e}", path.display()),
    })?;
    for config in &mut file.servers {
        apply_defaults(config);
    }
    Ok(file.servers)
}

fn servers_from_aggregate_env() -> Vec<ServerConfig> {
    let Ok(raw) = std::env::var(AGGREGATE_ENV_VAR) else {
        return Vec::new();
    };
    if raw.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<ServerConfig>>(&raw) {
        Ok(mut servers) => {
            for config in &mut servers {
                apply_defaults(config);
            }
            tracing::debug!(count = servers.len(), "loaded servers from {AGGREGATE_ENV_VAR}");
            servers
        }
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed {AGGREGATE_ENV_VAR}");
            Vec::new()
        }
    }
}

/// Rebuild server configs from `RYAN_MCP_SERVER_<NAME>_<PROPERTY>` pairs.
///
/// The name is the segment after the prefix, lowercased. Servers without a
/// `URL` property are dropped. Credentials are only read when `AUTH` is set.
pub fn servers_from_env_vars<I>(vars: I) -> Vec<ServerConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut grouped: BTreeMap<String, HashMap<String, String>> = BTreeMap::new();

    for (key, value) in vars {
        let Some(rest) = key.strip_prefix(SERVER_ENV_PREFIX) else {
            continue;
        };
        let Some((name, property)) = rest.split_once('_') else {
            continue;
        };
        if name.is_empty() || property.is_empty() {
            continue;
        }
        grouped
            .entry(name.to_ascii_lowercase())
            .or_default()
            .insert(property.to_ascii_lowercase(), value);
    }

    grouped
        .into_iter()
        .filter_map(|(name, props)| {
            let url = props.get("url")?;
            let mut config = ServerConfig::new(&name, url);
            if let Some(auth) = props.get("auth") {
                config.auth_type = AuthType::parse(auth);
                config.credentials = props
                    .iter()
                    .filter_map(|(prop, value)| {
                        prop.strip_prefix("cred_").map(|k| (k.to_string(), value.clone()))
                    })
                    .collect();
            }
            apply_defaults(&mut config);
            Some(config)
        })
        .collect()
}

/// Fill unset timing and sizing fields.
pub fn apply_defaults(config: &mut ServerConfig) {
    if config.timeout.is_zero() {
        config.timeout = DEFAULT_TIMEOUT;
    }
    if config.retry_attempts == 0 {
        config.retry_attempts = DEFAULT_RETRY_ATTEMPTS;
    }
    if config.retry_delay.is_zero() {
        config.retry_delay = DEFAULT_RETRY_DELAY;
    }
    if config.max_connections == 0 {
        config.max_connections = DEFAULT_MAX_CONNECTIONS;
    }
}

// ─── Merge ───────────────────────────────────────────────────────────────────

/// Merge a later source into an earlier one.
///
/// Entries from `overrides` fully replace same-named entries in `base`.
pub fn merge_configs(
    mut base: HashMap<String, ServerConfig>,
    overrides: HashMap<String, ServerConfig>,
) -> HashMap<String, ServerConfig> {
    for (name, config) in overrides {
        base.insert(name, config);
    }
    base
}

fn by_name(servers: Vec<ServerConfig>) -> HashMap<String, ServerConfig> {
    servers.into_iter().map(|s| (s.name.clone(), s)).collect()
}

// ─── Files ───────────────────────────────────────────────────────────────────

/// Write a starter discovery file with a built-in and a filesystem server.
pub fn create_default_server_configuration(path: &Path) -> Result<(), McpError> {
    let document = json!({
        "version": FILE_FORMAT_VERSION,
        "description": "Ryan MCP Server Configuration",
        "servers": [
            {
                "name": "ryan-builtin",
                "url": "http://localhost:8000/mcp",
                "enabled": true,
                "timeout": 30_000,
                "retryAttempts": 3,
                "retryDelay": 1_000,
                "keepAlive": true,
                "maxConnections": 10,
                "supportedFeatures": ["tools", "resources", "prompts"],
                "metadata": {
                    "description": "Built-in Ryan MCP server with core tools",
                    "type": "builtin"
                }
            },
            {
                "name": "filesystem",
                "url": "http://localhost:8001/mcp",
                "enabled": false,
                "timeout": 15_000,
                "retryAttempts": 2,
                "retryDelay": 500,
                "keepAlive": true,
                "maxConnections": 5,
                "supportedFeatures": ["tools"],
                "metadata": {
                    "description": "Filesystem operations MCP server",
                    "type": "filesystem",
                    "security": "requires-permission"
                }
            }
        ]
    });

    let content = serde_json::to_string_pretty(&document)?;
    write_private(path, &content)?;
    tracing::info!(path = %path.display(), "created default server configuration");
    Ok(())
}

/// Write `content` readable by the owner only, creating parent directories.
///
/// Goes through a temp file and a rename so readers never see a partial file.
fn write_private(path: &Path, content: &str) -> Result<(), McpError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    {
        use std::io::Write;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
