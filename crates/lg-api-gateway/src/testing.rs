//! In-memory collaborators for tests.
//!
//! Enabled for this crate's unit tests and, through the `test-utils`
//! feature, for the workspace integration tests.

use crate::domain::{
    Address, Event, KeyInfo, NodeStatus, QueryResponse, Receipt, Signature, SignedTx, Topic,
    ADDRESS_LEN,
};
use crate::ports::{EventStream, KeyError, KeyManager, NodeClient, NodeError};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// FakeNodeClient
// ============================================================================

/// Scriptable node. Events are pushed with [`FakeNodeClient::emit`] to every
/// live stream of a topic.
pub struct FakeNodeClient {
    queries: Mutex<HashMap<(String, String), Value>>,
    broadcasts: Mutex<Vec<SignedTx>>,
    feeds: Mutex<HashMap<Topic, Vec<mpsc::UnboundedSender<Event>>>>,
    subscribe_calls: Mutex<HashMap<Topic, usize>>,
    subscribe_failing: AtomicBool,
    height: AtomicU64,
    receipt: Receipt,
    reject: Option<String>,
    delay: Option<Duration>,
}

impl Default for FakeNodeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeNodeClient {
    pub fn new() -> Self {
        Self {
            queries: Mutex::new(HashMap::new()),
            broadcasts: Mutex::new(Vec::new()),
            feeds: Mutex::new(HashMap::new()),
            subscribe_calls: Mutex::new(HashMap::new()),
            subscribe_failing: AtomicBool::new(false),
            height: AtomicU64::new(1),
            receipt: Receipt(json!({"check_tx": {"code": 0}, "deliver_tx": {"code": 0}, "height": 1})),
            reject: None,
            delay: None,
        }
    }

    pub fn with_receipt(mut self, receipt: Receipt) -> Self {
        self.receipt = receipt;
        self
    }

    /// Refuse every broadcast with `reason`.
    pub fn rejecting(mut self, reason: &str) -> Self {
        self.reject = Some(reason.to_string());
        self
    }

    /// Delay every query and broadcast.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_query(&self, path: &str, data: &[u8], value: Value) {
        self.queries
            .lock()
            .insert((path.to_string(), hex::encode(data)), value);
    }

    pub fn set_subscribe_failing(&self, failing: bool) {
        self.subscribe_failing.store(failing, Ordering::SeqCst);
    }

    pub fn broadcasts(&self) -> Vec<SignedTx> {
        self.broadcasts.lock().clone()
    }

    /// Push an event to every live stream of `topic`. Returns how many
    /// streams received it.
    pub fn emit(&self, topic: &Topic, payload: Value) -> usize {
        let mut feeds = self.feeds.lock();
        let Some(senders) = feeds.get_mut(topic) else {
            return 0;
        };
        senders.retain(|tx| !tx.is_closed());
        let event = Event::new(topic.clone(), payload);
        senders
            .iter()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    /// End every stream of `topic`, as a lost upstream connection would.
    pub fn drop_streams(&self, topic: &Topic) {
        self.feeds.lock().remove(topic);
    }

    /// Streams for `topic` whose receiver is still alive.
    pub fn live_streams(&self, topic: &Topic) -> usize {
        self.feeds
            .lock()
            .get(topic)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }

    pub fn subscribe_calls(&self, topic: &Topic) -> usize {
        self.subscribe_calls.lock().get(topic).copied().unwrap_or(0)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl NodeClient for FakeNodeClient {
    async fn status(&self) -> Result<NodeStatus, NodeError> {
        Ok(NodeStatus {
            network: "fake-chain".into(),
            latest_height: self.height.load(Ordering::SeqCst),
        })
    }

    async fn query(&self, path: &str, data: &[u8]) -> Result<QueryResponse, NodeError> {
        self.pause().await;
        let value = self
            .queries
            .lock()
            .get(&(path.to_string(), hex::encode(data)))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(QueryResponse {
            height: self.height.load(Ordering::SeqCst),
            value,
        })
    }

    async fn broadcast(&self, tx: &SignedTx) -> Result<Receipt, NodeError> {
        self.pause().await;
        if let Some(reason) = &self.reject {
            return Err(NodeError::Rejected(reason.clone()));
        }
        self.broadcasts.lock().push(tx.clone());
        self.height.fetch_add(1, Ordering::SeqCst);
        Ok(self.receipt.clone())
    }

    async fn subscribe(&self, topic: &Topic) -> Result<EventStream, NodeError> {
        *self.subscribe_calls.lock().entry(topic.clone()).or_default() += 1;
        if self.subscribe_failing.load(Ordering::SeqCst) {
            return Err(NodeError::Unavailable("event endpoint down".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().entry(topic.clone()).or_default().push(tx);
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(stream.boxed())
    }
}

// ============================================================================
// InMemoryKeyManager
// ============================================================================

struct StoredKey {
    info: KeyInfo,
    passphrase: String,
}

/// Key manager holding keys in a map. Signatures are deterministic digests,
/// not real cryptography.
#[derive(Default)]
pub struct InMemoryKeyManager {
    keys: Mutex<HashMap<String, StoredKey>>,
}

impl InMemoryKeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn digest(parts: &[&[u8]], len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        let mut round = 0u64;
        while out.len() < len {
            let mut hasher = DefaultHasher::new();
            round.hash(&mut hasher);
            for part in parts {
                part.hash(&mut hasher);
            }
            out.extend_from_slice(&hasher.finish().to_be_bytes());
            round += 1;
        }
        out.truncate(len);
        out
    }
}

#[async_trait]
impl KeyManager for InMemoryKeyManager {
    async fn list(&self) -> Result<Vec<KeyInfo>, KeyError> {
        let mut keys: Vec<KeyInfo> = self.keys.lock().values().map(|k| k.info.clone()).collect();
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(keys)
    }

    async fn get(&self, name: &str) -> Result<KeyInfo, KeyError> {
        self.keys
            .lock()
            .get(name)
            .map(|k| k.info.clone())
            .ok_or_else(|| KeyError::KeyNotFound(name.to_string()))
    }

    async fn create(
        &self,
        name: &str,
        passphrase: &str,
        algo: Option<&str>,
    ) -> Result<KeyInfo, KeyError> {
        let mut keys = self.keys.lock();
        if keys.contains_key(name) {
            return Err(KeyError::KeyExists(name.to_string()));
        }
        let pub_key = Self::digest(&[b"pub".as_slice(), name.as_bytes()], 32);
        let address = Address::from_slice(&Self::digest(&[b"addr".as_slice(), pub_key.as_slice()], ADDRESS_LEN))
            .ok_or_else(|| KeyError::Unavailable("address derivation".into()))?;
        let info = KeyInfo {
            name: name.to_string(),
            address,
            pub_key: hex::encode(pub_key),
            algo: algo.unwrap_or("ed25519").to_string(),
        };
        keys.insert(
            name.to_string(),
            StoredKey {
                info: info.clone(),
                passphrase: passphrase.to_string(),
            },
        );
        Ok(info)
    }

    async fn update(&self, name: &str, old: &str, new: &str) -> Result<KeyInfo, KeyError> {
        let mut keys = self.keys.lock();
        let key = keys
            .get_mut(name)
            .ok_or_else(|| KeyError::KeyNotFound(name.to_string()))?;
        if key.passphrase != old {
            return Err(KeyError::InvalidPassphrase(name.to_string()));
        }
        key.passphrase = new.to_string();
        Ok(key.info.clone())
    }

    async fn delete(&self, name: &str, passphrase: &str) -> Result<(), KeyError> {
        let mut keys = self.keys.lock();
        match keys.get(name) {
            None => Err(KeyError::KeyNotFound(name.to_string())),
            Some(key) if key.passphrase != passphrase => {
                Err(KeyError::InvalidPassphrase(name.to_string()))
            }
            Some(_) => {
                keys.remove(name);
                Ok(())
            }
        }
    }

    async fn sign(
        &self,
        name: &str,
        passphrase: &str,
        payload: &[u8],
    ) -> Result<Signature, KeyError> {
        let keys = self.keys.lock();
        let key = keys
            .get(name)
            .ok_or_else(|| KeyError::KeyNotFound(name.to_string()))?;
        if key.passphrase != passphrase {
            return Err(KeyError::InvalidPassphrase(name.to_string()));
        }
        let sig = Self::digest(&[key.info.pub_key.as_bytes(), payload], 64);
        Ok(Signature {
            algo: key.info.algo.clone(),
            pub_key: key.info.pub_key.clone(),
            signature: hex::encode(sig),
        })
    }
}
