//! Gateway configuration with validation.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default listening port of the gateway.
pub const DEFAULT_PORT: u16 = 8998;

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address serving both the HTTP routes and `/websocket`
    pub listen_addr: SocketAddr,
    /// Directory holding keys and the optional `gateway.json`
    pub home_dir: PathBuf,
    /// Collaborator and request timeouts
    pub timeouts: TimeoutConfig,
    /// Event surface configuration
    pub websocket: WebSocketConfig,
    /// Upstream topic stream reconnection
    pub upstream: UpstreamConfig,
    /// Request size limits
    pub limits: LimitsConfig,
    /// Node endpoints
    pub node: NodeConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            home_dir: default_home_dir(),
            timeouts: TimeoutConfig::default(),
            websocket: WebSocketConfig::default(),
            upstream: UpstreamConfig::default(),
            limits: LimitsConfig::default(),
            node: NodeConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeouts.call.is_zero() {
            return Err(ConfigError::InvalidTimeout("call timeout cannot be 0".into()));
        }
        if self.timeouts.request.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "request timeout cannot be 0".into(),
            ));
        }
        if self.timeouts.request < self.timeouts.call {
            return Err(ConfigError::InvalidTimeout(format!(
                "request timeout ({:?}) is shorter than call timeout ({:?})",
                self.timeouts.request, self.timeouts.call
            )));
        }

        if self.websocket.outbox_capacity == 0 {
            return Err(ConfigError::InvalidLimit("outbox_capacity cannot be 0".into()));
        }
        if self.websocket.max_subscriptions_per_connection == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_subscriptions_per_connection cannot be 0".into(),
            ));
        }
        if self.websocket.max_message_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_message_size cannot be 0".into(),
            ));
        }
        if self.websocket.control_rate_limit == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "control_rate_limit cannot be 0".into(),
            ));
        }

        if self.upstream.reconnect_base.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "reconnect_base cannot be 0".into(),
            ));
        }
        if self.upstream.reconnect_base > self.upstream.reconnect_max {
            return Err(ConfigError::InvalidTimeout(
                "reconnect_base exceeds reconnect_max".into(),
            ));
        }

        if self.limits.max_body_size == 0 {
            return Err(ConfigError::InvalidLimit("max_body_size cannot be 0".into()));
        }

        if self.node.rpc_url.trim().is_empty() {
            return Err(ConfigError::Invalid("node.rpc_url is empty".into()));
        }

        Ok(())
    }

    /// Directory for key files.
    pub fn keys_dir(&self) -> PathBuf {
        self.home_dir.join("keys")
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bound on each key manager or node call
    #[serde(with = "humantime_serde")]
    pub call: Duration,
    /// Bound on a whole HTTP request
    #[serde(with = "humantime_serde")]
    pub request: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call: Duration::from_secs(10),
            request: Duration::from_secs(30),
        }
    }
}

/// WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Pending frames per connection before it is evicted as a slow consumer
    pub outbox_capacity: usize,
    /// Max subscriptions per connection
    pub max_subscriptions_per_connection: usize,
    /// Largest inbound frame accepted, in bytes
    pub max_message_size: usize,
    /// Control messages per second per connection
    pub control_rate_limit: u32,
    /// Ping interval
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: 256,
            max_subscriptions_per_connection: 64,
            max_message_size: 64 * 1024,
            control_rate_limit: 50,
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// Backoff for re-establishing a lost upstream topic stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    #[serde(with = "humantime_serde")]
    pub reconnect_base: Duration,
    #[serde(with = "humantime_serde")]
    pub reconnect_max: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            reconnect_base: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

impl UpstreamConfig {
    /// Delay before reconnect attempt `attempt` (0-based), doubling up to the max.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.reconnect_base
            .saturating_mul(factor)
            .min(self.reconnect_max)
    }
}

/// Request limits configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max request body size in bytes (default: 1MB)
    pub max_body_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 1024 * 1024,
        }
    }
}

/// Node endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// JSON-RPC endpoint for queries and broadcasts
    pub rpc_url: String,
    /// Event endpoint; derived from `rpc_url` when unset
    pub ws_url: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:46657".to_string(),
            ws_url: None,
        }
    }
}

impl NodeConfig {
    /// Event endpoint, falling back to `<rpc_url as ws>/websocket`.
    pub fn event_url(&self) -> String {
        if let Some(url) = &self.ws_url {
            return url.clone();
        }
        let base = self.rpc_url.trim_end_matches('/');
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/websocket", ws)
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid rate limiting configuration
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".basecli")
}
