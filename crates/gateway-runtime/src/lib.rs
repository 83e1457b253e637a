//! # Gateway Runtime Library
//!
//! Adapters, configuration loading and logging setup used by the
//! `ledger-gateway` binary. Exposed as a library for tests.

#![allow(missing_docs)]
#![allow(clippy::type_complexity)]

pub mod adapters;
pub mod config;
pub mod telemetry;

pub use adapters::{FileKeyStore, KdfCost, RpcNodeClient};
pub use config::{load_config, load_config_with, LoadError};
pub use telemetry::{init_logging, LogConfig};
