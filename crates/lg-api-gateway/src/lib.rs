#![allow(missing_docs)]

//! Ledger Gateway - REST routes for a ledger node plus WebSocket event fan-out.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       LEDGER GATEWAY                          │
//! ├───────────────────────────────────────────────────────────────┤
//! │   HTTP (one listening address)         GET /websocket         │
//! │          │                                   │                │
//! │   Tracing → Timeout → BodyLimit        WebSocketHandler       │
//! │          │                            (reader + writer task)  │
//! │   ┌──────┴───────┐                           │                │
//! │   │    Router    │  routes composed   ┌──────┴────────────┐   │
//! │   │ (RouteTable) │  from Registrars   │SubscriptionManager│   │
//! │   └──────┬───────┘                    │ refcounted topics │   │
//! │          │                            │ bounded outboxes  │   │
//! │  keys coin roles sign post-tx nonce   └──────┬────────────┘   │
//! │          │                                   │ one pump/topic │
//! └──────────┼───────────────────────────────────┼────────────────┘
//!            ▼                                   ▼
//!       KeyManager                          NodeClient
//! ```
//!
//! Registrars receive their collaborators (`Arc<dyn KeyManager>`,
//! `Arc<dyn NodeClient>`) in their constructors and declare routes on a
//! [`router::RouteScope`]. Two registrars claiming the same method and path
//! abort composition with [`GatewayError::RouteConflict`].
//!
//! # Usage
//!
//! ```ignore
//! use lg_api_gateway::{registrars::default_registrars, GatewayConfig, GatewayService};
//!
//! let config = GatewayConfig::default();
//! let registrars = default_registrars(keys, node.clone(), config.timeouts.call);
//! let service = GatewayService::new(config, node, registrars)?;
//! service.serve(listener, shutdown).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod domain;
pub mod middleware;
pub mod ports;
pub mod registrars;
pub mod router;
pub mod service;
pub mod ws;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports for public API
pub use domain::config::GatewayConfig;
pub use domain::error::{ApiError, ApiResult, ErrorKind, GatewayError};
pub use domain::types::*;
pub use middleware::GatewayMetrics;
pub use ports::{KeyError, KeyManager, NodeClient, NodeError};
pub use router::{Registrar, Router};
pub use service::GatewayService;
pub use ws::SubscriptionManager;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
