//! Outbound (Driven) ports for the ledger gateway.
//!
//! Implementations live in the runtime crate (`RpcNodeClient`,
//! `FileKeyStore`) and in [`crate::testing`] for tests.

use crate::domain::{
    ApiError, Event, KeyInfo, NodeStatus, QueryResponse, Receipt, Signature, SignedTx, Topic,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::future::Future;
use std::time::Duration;

/// Live stream of node events for one topic. Ends when the upstream drops.
pub type EventStream = BoxStream<'static, Event>;

/// Node client errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    /// Node unreachable or its transport failed
    #[error("node unavailable: {0}")]
    Unavailable(String),
    /// The node could not interpret the query
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// The node refused the transaction
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// Key manager errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("key '{0}' not found")]
    KeyNotFound(String),
    #[error("key '{0}' already exists")]
    KeyExists(String),
    #[error("invalid passphrase for key '{0}'")]
    InvalidPassphrase(String),
    /// Invalid key name or algorithm
    #[error("invalid key request: {0}")]
    Invalid(String),
    #[error("key store unavailable: {0}")]
    Unavailable(String),
}

impl From<NodeError> for ApiError {
    fn from(e: NodeError) -> Self {
        match e {
            NodeError::Unavailable(msg) => ApiError::unavailable(format!("node: {}", msg)),
            NodeError::InvalidQuery(msg) => ApiError::bad_request(msg),
            NodeError::Rejected(msg) => ApiError::rejected(msg),
        }
    }
}

impl From<KeyError> for ApiError {
    fn from(e: KeyError) -> Self {
        let msg = e.to_string();
        match e {
            KeyError::KeyNotFound(_) => ApiError::not_found(msg),
            KeyError::KeyExists(_) => ApiError::conflict(msg),
            KeyError::InvalidPassphrase(_) => ApiError::unauthorized(msg),
            KeyError::Invalid(_) => ApiError::bad_request(msg),
            KeyError::Unavailable(_) => ApiError::unavailable(msg),
        }
    }
}

/// Access to the consensus node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Node identity and height. Used for the startup probe and `/health`.
    async fn status(&self) -> Result<NodeStatus, NodeError>;

    /// Query node state at `path` (e.g. `/account`, `/nonce`).
    async fn query(&self, path: &str, data: &[u8]) -> Result<QueryResponse, NodeError>;

    /// Submit a signed transaction and return the node's receipt.
    async fn broadcast(&self, tx: &SignedTx) -> Result<Receipt, NodeError>;

    /// Open an event stream for `topic`.
    ///
    /// Dropping the stream must release the upstream subscription.
    async fn subscribe(&self, topic: &Topic) -> Result<EventStream, NodeError>;
}

/// Key storage and signing.
#[async_trait]
pub trait KeyManager: Send + Sync {
    async fn list(&self) -> Result<Vec<KeyInfo>, KeyError>;

    async fn get(&self, name: &str) -> Result<KeyInfo, KeyError>;

    /// Create a key. `algo` defaults to the manager's native algorithm.
    async fn create(
        &self,
        name: &str,
        passphrase: &str,
        algo: Option<&str>,
    ) -> Result<KeyInfo, KeyError>;

    /// Re-seal a key under a new passphrase.
    async fn update(&self, name: &str, old: &str, new: &str) -> Result<KeyInfo, KeyError>;

    async fn delete(&self, name: &str, passphrase: &str) -> Result<(), KeyError>;

    /// Sign `payload` with the named key.
    async fn sign(&self, name: &str, passphrase: &str, payload: &[u8])
        -> Result<Signature, KeyError>;
}

/// Run a collaborator call under `limit`, mapping its error into [`ApiError`].
pub async fn bounded<T, E, F>(limit: Duration, operation: &str, fut: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ApiError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "collaborator call timed out");
            Err(ApiError::timeout(operation))
        }
    }
}
