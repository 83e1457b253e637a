//! WebSocket connection handler for the event surface.
//!
//! Each connection runs a reader (this task) and a writer task. The writer
//! drains the connection's outbox and sends keepalive pings. The reader
//! enforces frame size and control-message rate limits and turns control
//! messages into manager calls. Node calls run on their own task, bounded by
//! the call timeout, and answer through the same outbox. Errors stay on
//! their connection.

use crate::domain::config::WebSocketConfig;
use crate::domain::error::codes;
use crate::domain::{ApiError, ConnectionId, ErrorKind};
use crate::ports::{bounded, NodeClient};
use crate::ws::messages::{
    parse_control, ClientMessage, ControlError, NodeCall, NodeRequest, Outbound, ServerMessage,
};
use crate::ws::subscriptions::{ConnectionHandle, ConnectionState, SubscriptionManager};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// How long the reader waits for the writer to flush its close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// WebSocket connection handler
pub struct WebSocketHandler {
    manager: Arc<SubscriptionManager>,
    node: Arc<dyn NodeClient>,
    config: WebSocketConfig,
    call_timeout: Duration,
    limiter: DefaultDirectRateLimiter,
}

impl WebSocketHandler {
    pub fn new(
        manager: Arc<SubscriptionManager>,
        node: Arc<dyn NodeClient>,
        config: WebSocketConfig,
        call_timeout: Duration,
    ) -> Self {
        let per_second = NonZeroU32::new(config.control_rate_limit).unwrap_or(NonZeroU32::MIN);
        Self {
            manager,
            node,
            config,
            call_timeout,
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    /// Handle a WebSocket connection
    pub async fn handle(self, socket: WebSocket) {
        let ConnectionHandle { id, outbox, state } = self.manager.open_connection();
        let (sink, mut stream) = socket.split();

        let mut writer = tokio::spawn(write_loop(
            self.manager.clone(),
            id,
            sink,
            outbox,
            state.clone(),
            self.config.ping_interval,
        ));

        let mut state = state;
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(msg)) => {
                        if !self.on_frame(&id, msg) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(connection_id = %id, error = %e, "websocket read failed");
                        break;
                    }
                    None => break,
                },
                changed = state.changed() => {
                    let current = *state.borrow();
                    if changed.is_err() || current != ConnectionState::Open {
                        debug!(connection_id = %id, state = ?current, "connection leaving open state");
                        break;
                    }
                }
            }
        }

        self.manager.close(&id);
        self.manager.remove_connection(&id);
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
            .await
            .is_err()
        {
            writer.abort();
        }
    }

    /// Process one inbound frame. Returns `false` when the client closed.
    fn on_frame(&self, id: &ConnectionId, msg: Message) -> bool {
        let text = match msg {
            Message::Text(text) => text,
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    self.reject(id, ControlError::new(codes::INVALID_REQUEST, "binary frames must be UTF-8 JSON"));
                    return true;
                }
            },
            // Pongs are answered by the transport.
            Message::Ping(_) | Message::Pong(_) => return true,
            Message::Close(_) => {
                debug!(connection_id = %id, "websocket close received");
                return false;
            }
        };

        if text.len() > self.config.max_message_size {
            warn!(
                connection_id = %id,
                size = text.len(),
                max = self.config.max_message_size,
                "control message exceeds size limit"
            );
            self.reject(
                id,
                ControlError::new(
                    codes::INVALID_REQUEST,
                    format!(
                        "message too large: {} bytes (max: {})",
                        text.len(),
                        self.config.max_message_size
                    ),
                ),
            );
            return true;
        }

        if self.limiter.check().is_err() {
            self.reject(id, ControlError::new(codes::LIMIT_EXCEEDED, "rate limit exceeded"));
            return true;
        }

        let result = match parse_control(&text) {
            Ok(ClientMessage::Subscribe(topic)) => self.manager.subscribe(id, topic),
            Ok(ClientMessage::Unsubscribe(topic)) => self.manager.unsubscribe(id, &topic),
            Ok(ClientMessage::Call(call)) => {
                self.spawn_call(id, call);
                return true;
            }
            Err(e) => {
                self.reject(id, e);
                return true;
            }
        };

        if let Err(e) = result {
            self.reject(id, ControlError::new(codes::SUBSCRIPTION_ERROR, e.to_string()));
        }
        true
    }

    fn spawn_call(&self, id: &ConnectionId, call: NodeCall) {
        let manager = Arc::clone(&self.manager);
        let node = Arc::clone(&self.node);
        let limit = self.call_timeout;
        let id = *id;

        tokio::spawn(async move {
            let NodeCall { id: call_id, request } = call;
            let reply = match run_call(node.as_ref(), limit, request).await {
                Ok(result) => ServerMessage::Result {
                    id: call_id,
                    result,
                },
                Err(e) => {
                    debug!(connection_id = %id, kind = e.kind.as_str(), error = %e.message, "node call failed");
                    manager.metrics().record_control_error();
                    ServerMessage::call_error(call_id, &call_failure(&e))
                }
            };
            manager.reply(&id, reply);
        });
    }

    fn reject(&self, id: &ConnectionId, err: ControlError) {
        debug!(connection_id = %id, code = err.code, error = %err, "control message rejected");
        self.manager.metrics().record_control_error();
        self.manager.reply(id, ServerMessage::error(&err));
    }
}

/// Execute one node call under `limit`.
async fn run_call(
    node: &dyn NodeClient,
    limit: Duration,
    request: NodeRequest,
) -> Result<Value, ApiError> {
    let encode = |e: serde_json::Error| ApiError::internal(e.to_string());
    match request {
        NodeRequest::Status => {
            let status = bounded(limit, "status", node.status()).await?;
            serde_json::to_value(status).map_err(encode)
        }
        NodeRequest::Query { path, data } => {
            let response = bounded(limit, "abci_query", node.query(&path, &data)).await?;
            serde_json::to_value(response).map_err(encode)
        }
        NodeRequest::Broadcast(tx) => {
            let receipt = bounded(limit, "broadcast_tx", node.broadcast(&tx)).await?;
            Ok(receipt.0)
        }
    }
}

fn call_failure(err: &ApiError) -> ControlError {
    let code = match err.kind {
        ErrorKind::BadRequest => codes::INVALID_PARAMS,
        ErrorKind::Internal => codes::INTERNAL_ERROR,
        _ => codes::NODE_ERROR,
    };
    ControlError::new(code, format!("{}: {}", err.kind.as_str(), err.message))
}

async fn write_loop(
    manager: Arc<SubscriptionManager>,
    id: ConnectionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbox: mpsc::Receiver<Outbound>,
    mut state: watch::Receiver<ConnectionState>,
    ping_interval: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval);
    ping.tick().await;

    loop {
        tokio::select! {
            biased;

            changed = state.changed() => {
                let current = *state.borrow();
                if changed.is_err() || matches!(current, ConnectionState::Closing | ConnectionState::Closed) {
                    outbox.close();
                    let discarded = std::iter::from_fn(|| outbox.try_recv().ok()).count();
                    debug!(connection_id = %id, discarded, "closing writer");
                    let frame = if current == ConnectionState::Closing {
                        CloseFrame {
                            code: close_code::AWAY,
                            reason: "connection closing".into(),
                        }
                    } else {
                        CloseFrame {
                            code: close_code::NORMAL,
                            reason: "".into(),
                        }
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
            }

            item = outbox.recv() => {
                let Some(item) = item else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let text = match item.to_text() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(connection_id = %id, error = %e, "failed to encode outbound frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    info!(connection_id = %id, error = %e, "websocket write failed");
                    manager.close(&id);
                    break;
                }
            }

            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    info!(connection_id = %id, error = %e, "websocket ping failed");
                    manager.close(&id);
                    break;
                }
            }
        }
    }
}
