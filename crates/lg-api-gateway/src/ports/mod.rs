//! Ports for the ledger gateway.
//!
//! The gateway drives two collaborators it does not implement: the node
//! (queries, broadcasts, topic streams) and the key manager (key storage
//! and signing).

pub mod outbound;

pub use outbound::{bounded, EventStream, KeyError, KeyManager, NodeClient, NodeError};
