//! Logging setup for the gateway binary.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RUST_LOG` | - | full filter directive, wins over `LG_LOG_LEVEL` |
//! | `LG_LOG_LEVEL` | `info` | log level filter |
//! | `LG_JSON_LOGS` | `false` | JSON output instead of pretty text |

use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration from environment variables.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self {
            level: env::var("LG_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            json: env::var("LG_JSON_LOGS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to initialize logging: {0}")]
pub struct LogInitError(String);

/// Install the global subscriber.
pub fn init_logging(config: &LogConfig) -> Result<(), LogInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| LogInitError(e.to_string()))?;

    if config.json {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
            .map_err(|e| LogInitError(e.to_string()))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| LogInitError(e.to_string()))
    }
}
