//! Runtime configuration loading.
//!
//! Layers, lowest precedence first: built-in defaults, the optional JSON
//! file `<home>/gateway.json`, then environment variables.
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `LG_HOME` | home directory (keys, config file) |
//! | `LG_LISTEN_ADDR` | full listen address, e.g. `127.0.0.1:8998` |
//! | `LG_PORT` | listen port, keeping the configured host |
//! | `LG_NODE_URL` | node JSON-RPC endpoint |
//! | `LG_NODE_WS_URL` | node event endpoint |
//! | `LG_CALL_TIMEOUT` | collaborator call bound, e.g. `5s` |

use lg_api_gateway::GatewayConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Name of the optional config file inside the home directory.
pub const CONFIG_FILE: &str = "gateway.json";

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid value for {var}: {reason}")]
    Env { var: &'static str, reason: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Load configuration from the process environment.
pub fn load_config() -> Result<GatewayConfig, LoadError> {
    load_config_with(|var| std::env::var(var).ok())
}

/// Load configuration using `env` to look up variables.
pub fn load_config_with<F>(env: F) -> Result<GatewayConfig, LoadError>
where
    F: Fn(&str) -> Option<String>,
{
    let home = env("LG_HOME").map(PathBuf::from);
    let defaults = GatewayConfig::default();
    let config_path = home
        .as_deref()
        .unwrap_or(defaults.home_dir.as_path())
        .join(CONFIG_FILE);

    let mut config = match read_file(&config_path)? {
        Some(config) => {
            info!(path = %config_path.display(), "loaded config file");
            config
        }
        None => defaults,
    };

    if let Some(home) = home {
        config.home_dir = home;
    }
    apply_env(&mut config, &env)?;

    config
        .validate()
        .map_err(|e| LoadError::Invalid(e.to_string()))?;
    Ok(config)
}

fn read_file(path: &Path) -> Result<Option<GatewayConfig>, LoadError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LoadError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

fn apply_env<F>(config: &mut GatewayConfig, env: &F) -> Result<(), LoadError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = env("LG_LISTEN_ADDR") {
        config.listen_addr = addr.parse::<SocketAddr>().map_err(|e| LoadError::Env {
            var: "LG_LISTEN_ADDR",
            reason: e.to_string(),
        })?;
    }
    if let Some(port) = env("LG_PORT") {
        let port = port.parse::<u16>().map_err(|e| LoadError::Env {
            var: "LG_PORT",
            reason: e.to_string(),
        })?;
        config.listen_addr.set_port(port);
    }
    if let Some(url) = env("LG_NODE_URL") {
        config.node.rpc_url = url;
    }
    if let Some(url) = env("LG_NODE_WS_URL") {
        config.node.ws_url = Some(url);
    }
    if let Some(timeout) = env("LG_CALL_TIMEOUT") {
        let timeout = humantime_serde::re::humantime::parse_duration(&timeout).map_err(|e| {
            LoadError::Env {
                var: "LG_CALL_TIMEOUT",
                reason: e.to_string(),
            }
        })?;
        config.timeouts.call = timeout;
        if config.timeouts.request < timeout {
            config.timeouts.request = timeout;
        }
    }
    Ok(())
}
