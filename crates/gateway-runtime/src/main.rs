//! # Ledger Gateway
//!
//! Serves the key, transaction and query routes of a ledger node plus
//! WebSocket event subscriptions on one listening address.
//!
//! ## Startup Sequence
//!
//! 1. Install logging (`RUST_LOG` / `LG_LOG_LEVEL`, `LG_JSON_LOGS`)
//! 2. Load configuration (defaults, `<home>/gateway.json`, environment)
//! 3. Open the key store and the node client
//! 4. Probe the node; an unreachable node aborts startup
//! 5. Compose the registrars; a route conflict aborts startup
//! 6. Serve until Ctrl+C, then close event connections and drain

use std::sync::Arc;

use anyhow::{Context, Result};
use gateway_runtime::{init_logging, load_config, FileKeyStore, LogConfig, RpcNodeClient};
use lg_api_gateway::registrars::default_registrars;
use lg_api_gateway::{GatewayError, GatewayService, NodeClient};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&LogConfig::from_env())?;

    let config = load_config().context("loading configuration")?;
    info!(
        listen_addr = %config.listen_addr,
        home = %config.home_dir.display(),
        node = %config.node.rpc_url,
        "starting ledger gateway v{}",
        lg_api_gateway::VERSION
    );

    let keys = Arc::new(FileKeyStore::open(config.keys_dir()).context("opening key store")?);
    let node: Arc<dyn NodeClient> = Arc::new(
        RpcNodeClient::new(&config.node, config.timeouts.call).context("building node client")?,
    );

    let status = tokio::time::timeout(config.timeouts.call, node.status())
        .await
        .map_err(|_| GatewayError::CollaboratorUnavailable("node status timed out".into()))?
        .map_err(|e| GatewayError::CollaboratorUnavailable(e.to_string()))
        .context("probing node")?;
    info!(network = %status.network, height = status.latest_height, "node reachable");

    let registrars = default_registrars(keys, Arc::clone(&node), config.timeouts.call);
    let listen_addr = config.listen_addr;
    let service = GatewayService::new(config, node, registrars).context("composing gateway")?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|e| GatewayError::Bind(format!("{}: {}", listen_addr, e)))?;

    service
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
