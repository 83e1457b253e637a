//! # Ledger Gateway Test Suite
//!
//! End-to-end tests that start a real gateway on `127.0.0.1:0` and drive
//! it over HTTP (`reqwest`) and WebSocket (`tokio-tungstenite`).
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── harness.rs          # TestGateway + WebSocket client helpers
//! └── integration/
//!     ├── routing.rs      # registrar routes over HTTP
//!     ├── fanout.rs       # subscriptions, ordering, cleanup
//!     └── end_to_end.rs   # real key store, build → sign → broadcast
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p lg-tests
//! cargo test -p lg-tests integration::fanout
//! ```

#![allow(dead_code)]

pub mod harness;
pub mod integration;
