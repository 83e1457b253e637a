//! Domain types for the ledger gateway.
//!
//! This module contains the core types, configuration, and error handling.

pub mod config;
pub mod correlation;
pub mod error;
pub mod types;

// Re-exports for convenience
pub use config::{ConfigError, GatewayConfig};
pub use correlation::ConnectionId;
pub use error::{ApiError, ApiResult, ErrorKind, GatewayError};
pub use types::*;
