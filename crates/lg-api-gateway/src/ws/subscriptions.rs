//! Event subscription manager.
//!
//! Tracks every open event connection and every (connection, topic)
//! subscription behind one coarse lock. The first subscriber of a topic
//! spawns an upstream pump for it; the last one to leave aborts the pump,
//! which drops the node stream.
//!
//! Fan-out never blocks: the subscribers' outbox senders are snapshotted
//! under the lock and each event is `try_send`-ed after it is released. A
//! full outbox evicts its connection as a slow consumer.

use crate::domain::config::{UpstreamConfig, WebSocketConfig};
use crate::domain::{ConnectionId, Event, Topic};
use crate::middleware::GatewayMetrics;
use crate::ports::NodeClient;
use crate::ws::messages::{Outbound, ServerMessage};
use crate::ws::upstream;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of one event connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Evicted or failing; no further deliveries.
    Closing,
    /// Released from the manager.
    Closed,
}

/// Subscribe error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    #[error("too many subscriptions for this connection (max {0})")]
    TooManySubscriptions(usize),
    #[error("not subscribed to '{0}'")]
    NotSubscribed(Topic),
    #[error("connection is not open")]
    ConnectionClosed,
}

/// Receiving half of a registered connection.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub outbox: mpsc::Receiver<Outbound>,
    pub state: watch::Receiver<ConnectionState>,
}

struct TopicEntry {
    subscribers: HashSet<ConnectionId>,
    pump: JoinHandle<()>,
    generation: u64,
    healthy: bool,
}

struct ConnectionEntry {
    outbox: mpsc::Sender<Outbound>,
    topics: HashSet<Topic>,
    state: watch::Sender<ConnectionState>,
}

#[derive(Default)]
struct Registry {
    topics: HashMap<Topic, TopicEntry>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    next_generation: u64,
}

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub evicted: usize,
}

/// Subscription manager
pub struct SubscriptionManager {
    registry: Mutex<Registry>,
    node: Arc<dyn NodeClient>,
    outbox_capacity: usize,
    max_per_connection: usize,
    upstream: UpstreamConfig,
    metrics: Arc<GatewayMetrics>,
    this: Weak<SubscriptionManager>,
}

impl SubscriptionManager {
    pub fn new(
        node: Arc<dyn NodeClient>,
        websocket: &WebSocketConfig,
        upstream: UpstreamConfig,
        metrics: Arc<GatewayMetrics>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            registry: Mutex::new(Registry::default()),
            node,
            outbox_capacity: websocket.outbox_capacity.max(1),
            max_per_connection: websocket.max_subscriptions_per_connection,
            upstream,
            metrics,
            this: this.clone(),
        })
    }

    /// Register a new connection in the Open state.
    pub fn open_connection(&self) -> ConnectionHandle {
        let id = ConnectionId::new();
        let (outbox_tx, outbox_rx) = mpsc::channel(self.outbox_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        self.registry.lock().connections.insert(
            id,
            ConnectionEntry {
                outbox: outbox_tx,
                topics: HashSet::new(),
                state: state_tx,
            },
        );
        self.set_state(&id, ConnectionState::Open);
        self.metrics.record_ws_connect();
        info!(connection_id = %id, "event connection opened");

        ConnectionHandle {
            id,
            outbox: outbox_rx,
            state: state_rx,
        }
    }

    /// Subscribe `id` to `topic` and queue the `subscribed` ack ahead of any
    /// event for it. Subscribing twice is a no-op that re-acks.
    pub fn subscribe(&self, id: &ConnectionId, topic: Topic) -> Result<(), SubscribeError> {
        let mut registry = self.registry.lock();
        let reg = &mut *registry;

        let conn = reg
            .connections
            .get_mut(id)
            .filter(|c| *c.state.borrow() == ConnectionState::Open)
            .ok_or(SubscribeError::ConnectionClosed)?;

        let fresh = !conn.topics.contains(&topic);
        if fresh && conn.topics.len() >= self.max_per_connection {
            return Err(SubscribeError::TooManySubscriptions(self.max_per_connection));
        }

        let ack = Outbound::Reply(ServerMessage::Subscribed {
            topic: topic.clone(),
        });
        if let Err(e) = conn.outbox.try_send(ack) {
            let full = matches!(e, TrySendError::Full(_));
            drop(registry);
            if full {
                self.evict(id);
            } else {
                self.remove_connection(id);
            }
            return Err(SubscribeError::ConnectionClosed);
        }

        if !fresh {
            return Ok(());
        }
        conn.topics.insert(topic.clone());

        match reg.topics.get_mut(&topic) {
            Some(entry) => {
                entry.subscribers.insert(*id);
            }
            None => {
                reg.next_generation += 1;
                let generation = reg.next_generation;
                let pump = tokio::spawn(upstream::run_pump(
                    self.this.clone(),
                    self.node.clone(),
                    topic.clone(),
                    generation,
                    self.upstream.clone(),
                ));
                reg.topics.insert(
                    topic.clone(),
                    TopicEntry {
                        subscribers: HashSet::from([*id]),
                        pump,
                        generation,
                        healthy: false,
                    },
                );
                self.metrics.record_topic_join();
                info!(topic = %topic, "upstream join");
            }
        }

        self.metrics.record_ws_subscribe();
        debug!(connection_id = %id, topic = %topic, "subscribed");
        Ok(())
    }

    /// Drop one subscription and queue the `unsubscribed` ack.
    pub fn unsubscribe(&self, id: &ConnectionId, topic: &Topic) -> Result<(), SubscribeError> {
        let mut registry = self.registry.lock();
        let reg = &mut *registry;

        let conn = reg
            .connections
            .get_mut(id)
            .ok_or(SubscribeError::ConnectionClosed)?;
        if !conn.topics.remove(topic) {
            return Err(SubscribeError::NotSubscribed(topic.clone()));
        }
        let ack = conn.outbox.try_send(Outbound::Reply(ServerMessage::Unsubscribed {
            topic: topic.clone(),
        }));

        release_topic(&mut reg.topics, id, topic, &self.metrics);
        self.metrics.record_ws_unsubscribe(1);
        drop(registry);
        debug!(connection_id = %id, topic = %topic, "unsubscribed");

        match ack {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.evict(id);
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                self.remove_connection(id);
                Ok(())
            }
        }
    }

    /// Queue a reply for one connection. `false` if it could not be queued,
    /// in which case the connection has been evicted or released.
    pub fn reply(&self, id: &ConnectionId, msg: ServerMessage) -> bool {
        let outbox = match self.registry.lock().connections.get(id) {
            Some(conn) => conn.outbox.clone(),
            None => return false,
        };
        match outbox.try_send(Outbound::Reply(msg)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.evict(id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.remove_connection(id);
                false
            }
        }
    }

    /// Fan an event out to the current subscribers of its topic.
    pub fn publish(&self, event: Event) -> Delivery {
        let topic = event.topic.clone();
        self.fan_out(&topic, None, Arc::new(event))
    }

    /// Deliver an event from the pump of `generation`. Events from a pump
    /// that has since been replaced are dropped.
    pub(crate) fn deliver(&self, topic: &Topic, generation: u64, event: Arc<Event>) -> Delivery {
        self.fan_out(topic, Some(generation), event)
    }

    fn fan_out(&self, topic: &Topic, generation: Option<u64>, event: Arc<Event>) -> Delivery {
        let targets: Vec<(ConnectionId, mpsc::Sender<Outbound>)> = {
            let registry = self.registry.lock();
            let Some(entry) = registry.topics.get(topic) else {
                return Delivery::default();
            };
            if generation.is_some_and(|g| g != entry.generation) {
                return Delivery::default();
            }
            entry
                .subscribers
                .iter()
                .filter_map(|id| {
                    registry
                        .connections
                        .get(id)
                        .map(|conn| (*id, conn.outbox.clone()))
                })
                .collect()
        };

        let mut outcome = Delivery::default();
        for (id, outbox) in targets {
            match outbox.try_send(Outbound::Event(event.clone())) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    if self.evict(&id) {
                        outcome.evicted += 1;
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    self.remove_connection(&id);
                }
            }
        }

        self.metrics.record_events_delivered(outcome.delivered as u64);
        outcome
    }

    /// Move a connection to Closing and release its subscriptions. Returns
    /// `true` if the connection was Open.
    pub fn evict(&self, id: &ConnectionId) -> bool {
        let mut registry = self.registry.lock();
        let reg = &mut *registry;
        let Some(conn) = reg.connections.get_mut(id) else {
            return false;
        };
        if *conn.state.borrow() != ConnectionState::Open {
            return false;
        }

        conn.state.send_replace(ConnectionState::Closing);
        let topics: Vec<Topic> = conn.topics.drain().collect();
        for topic in &topics {
            release_topic(&mut reg.topics, id, topic, &self.metrics);
        }
        self.metrics.record_ws_unsubscribe(topics.len() as u64);
        self.metrics.record_eviction();
        warn!(connection_id = %id, released = topics.len(), "slow consumer evicted");
        true
    }

    /// Mark a connection Closing without counting it as an eviction.
    pub fn close(&self, id: &ConnectionId) {
        if let Some(conn) = self.registry.lock().connections.get(id) {
            if *conn.state.borrow() == ConnectionState::Open {
                conn.state.send_replace(ConnectionState::Closing);
            }
        }
    }

    /// Release every subscription of `id`, drop it from the manager and
    /// report it Closed. Orphaned upstream pumps are aborted before return.
    pub fn remove_connection(&self, id: &ConnectionId) -> bool {
        let mut registry = self.registry.lock();
        let reg = &mut *registry;
        let Some(conn) = reg.connections.remove(id) else {
            return false;
        };

        for topic in &conn.topics {
            release_topic(&mut reg.topics, id, topic, &self.metrics);
        }
        self.metrics.record_ws_unsubscribe(conn.topics.len() as u64);
        self.metrics.record_ws_disconnect();
        conn.state.send_replace(ConnectionState::Closed);
        info!(connection_id = %id, released = conn.topics.len(), "event connection closed");
        true
    }

    /// Ask every connection to close. Used on shutdown.
    pub fn close_all(&self) {
        let registry = self.registry.lock();
        for conn in registry.connections.values() {
            if *conn.state.borrow() == ConnectionState::Open {
                conn.state.send_replace(ConnectionState::Closing);
            }
        }
        info!(connections = registry.connections.len(), "closing all event connections");
    }

    /// Record the pump's view of upstream health. Returns `false` once the
    /// pump's topic has been released, telling it to stop.
    pub(crate) fn mark_upstream(&self, topic: &Topic, generation: u64, healthy: bool) -> bool {
        let mut registry = self.registry.lock();
        match registry.topics.get_mut(topic) {
            Some(entry) if entry.generation == generation => {
                entry.healthy = healthy;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Upstream joins currently held for `topic`: 1 while anyone is
    /// subscribed, otherwise 0.
    pub fn upstream_joins(&self, topic: &Topic) -> usize {
        usize::from(self.registry.lock().topics.contains_key(topic))
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.registry
            .lock()
            .topics
            .get(topic)
            .map_or(0, |t| t.subscribers.len())
    }

    pub fn is_upstream_healthy(&self, topic: &Topic) -> Option<bool> {
        self.registry.lock().topics.get(topic).map(|t| t.healthy)
    }

    pub fn active_topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.registry.lock().topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn topics_of(&self, id: &ConnectionId) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self
            .registry
            .lock()
            .connections
            .get(id)
            .map(|c| c.topics.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    pub fn connection_state(&self, id: &ConnectionId) -> Option<ConnectionState> {
        self.registry
            .lock()
            .connections
            .get(id)
            .map(|c| *c.state.borrow())
    }

    pub fn connection_count(&self) -> usize {
        self.registry.lock().connections.len()
    }

    pub fn total_subscriptions(&self) -> usize {
        self.registry
            .lock()
            .connections
            .values()
            .map(|c| c.topics.len())
            .sum()
    }

    fn set_state(&self, id: &ConnectionId, state: ConnectionState) {
        if let Some(conn) = self.registry.lock().connections.get(id) {
            conn.state.send_replace(state);
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        for entry in self.registry.get_mut().topics.values() {
            entry.pump.abort();
        }
    }
}

/// Remove `id` from `topic`; the last leaver aborts the upstream pump.
fn release_topic(
    topics: &mut HashMap<Topic, TopicEntry>,
    id: &ConnectionId,
    topic: &Topic,
    metrics: &GatewayMetrics,
) {
    let Some(entry) = topics.get_mut(topic) else {
        return;
    };
    entry.subscribers.remove(id);
    if entry.subscribers.is_empty() {
        if let Some(entry) = topics.remove(topic) {
            entry.pump.abort();
            metrics.record_topic_leave();
            info!(topic = %topic, "upstream leave");
        }
    }
}
