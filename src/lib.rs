pub mod mcp_client;
pub mod permissions;

pub use mcp_client::{ClientConfig, McpClient, McpError, ServerConfig, ServerDiscovery};
pub use permissions::{PermissionEvaluator, PermissionManager};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "ryan_mcp=info,warn";

/// Install a global tracing subscriber for hosts that do not bring their own.
///
/// `RUST_LOG` overrides the default filter. With `json` set, events are
/// written as one JSON object per line. Returns `false` when a subscriber
/// was already installed.
pub fn init_tracing(json: bool) -> bool {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);

    let installed = if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::info!(version = env!("CARGO_PKG_VERSION"), json, "tracing initialized");
    }
    installed
}
