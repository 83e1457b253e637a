//! Node client over the node's JSON-RPC (HTTP) and event (WebSocket) endpoints.
//!
//! Queries go through `abci_query` with hex-encoded request data; the node
//! answers with hex-encoded JSON. Broadcasts use `broadcast_tx_commit` with
//! the JSON-serialized signed transaction, hex-encoded. Topic streams open
//! one WebSocket per topic and `subscribe` to the topic's event name.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use lg_api_gateway::domain::config::NodeConfig;
use lg_api_gateway::ports::{EventStream, NodeClient, NodeError};
use lg_api_gateway::{Event, NodeStatus, QueryResponse, Receipt, SignedTx, Topic};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// JSON-RPC failure before it is mapped to the operation's [`NodeError`].
#[derive(Debug)]
enum RpcFailure {
    Transport(String),
    Remote(String),
}

impl RpcFailure {
    fn or_remote(self, remote: fn(String) -> NodeError) -> NodeError {
        match self {
            RpcFailure::Transport(msg) => NodeError::Unavailable(msg),
            RpcFailure::Remote(msg) => remote(msg),
        }
    }
}

pub struct RpcNodeClient {
    http: reqwest::Client,
    rpc_url: String,
    event_url: String,
    next_id: AtomicU64,
}

impl RpcNodeClient {
    pub fn new(config: &NodeConfig, call_timeout: Duration) -> Result<Self, NodeError> {
        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| NodeError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            rpc_url: config.rpc_url.clone(),
            event_url: config.event_url(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcFailure> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcFailure::Transport(e.to_string()))?;
        let mut body: Value = response
            .json()
            .await
            .map_err(|e| RpcFailure::Transport(format!("malformed response: {}", e)))?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("data")
                .and_then(Value::as_str)
                .or_else(|| error.get("message").and_then(Value::as_str))
                .unwrap_or("unknown error");
            return Err(RpcFailure::Remote(message.to_string()));
        }
        match body.get_mut("result").map(Value::take) {
            Some(result) => Ok(result),
            None => Err(RpcFailure::Transport(format!("{} returned no result", method))),
        }
    }
}

#[async_trait]
impl NodeClient for RpcNodeClient {
    async fn status(&self) -> Result<NodeStatus, NodeError> {
        let result = self
            .call("status", json!({}))
            .await
            .map_err(|e| e.or_remote(NodeError::Unavailable))?;

        let network = result
            .pointer("/node_info/network")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let latest_height = result
            .pointer("/sync_info/latest_block_height")
            .or_else(|| result.get("latest_block_height"))
            .and_then(as_height)
            .unwrap_or(0);
        Ok(NodeStatus {
            network,
            latest_height,
        })
    }

    async fn query(&self, path: &str, data: &[u8]) -> Result<QueryResponse, NodeError> {
        let result = self
            .call(
                "abci_query",
                json!({ "path": path, "data": hex::encode(data), "prove": false }),
            )
            .await
            .map_err(|e| e.or_remote(NodeError::InvalidQuery))?;

        let response = result.get("response").unwrap_or(&result);
        let code = response.get("code").and_then(Value::as_u64).unwrap_or(0);
        if code != 0 {
            let log = response.get("log").and_then(Value::as_str).unwrap_or_default();
            return Err(NodeError::InvalidQuery(format!("code {}: {}", code, log)));
        }

        let height = response.get("height").and_then(as_height).unwrap_or(0);
        let value = match response.get("value").and_then(Value::as_str) {
            None | Some("") => Value::Null,
            Some(encoded) => decode_value(encoded)?,
        };
        Ok(QueryResponse { height, value })
    }

    async fn broadcast(&self, tx: &SignedTx) -> Result<Receipt, NodeError> {
        let encoded =
            serde_json::to_vec(tx).map_err(|e| NodeError::Rejected(e.to_string()))?;
        let result = self
            .call("broadcast_tx_commit", json!({ "tx": hex::encode(encoded) }))
            .await
            .map_err(|e| e.or_remote(NodeError::Rejected))?;

        for phase in ["check_tx", "deliver_tx"] {
            let Some(outcome) = result.get(phase) else {
                continue;
            };
            let code = outcome.get("code").and_then(Value::as_u64).unwrap_or(0);
            if code != 0 {
                let log = outcome.get("log").and_then(Value::as_str).unwrap_or_default();
                return Err(NodeError::Rejected(format!("{} code {}: {}", phase, code, log)));
            }
        }
        Ok(Receipt(result))
    }

    async fn subscribe(&self, topic: &Topic) -> Result<EventStream, NodeError> {
        let (socket, _) = tokio_tungstenite::connect_async(self.event_url.as_str())
            .await
            .map_err(|e| NodeError::Unavailable(format!("{}: {}", self.event_url, e)))?;
        let (mut sink, stream) = socket.split();

        let request = json!({
            "jsonrpc": "2.0",
            "id": format!("lg#{}", topic),
            "method": "subscribe",
            "params": { "event": topic.as_str() },
        });
        sink.send(Message::Text(request.to_string()))
            .await
            .map_err(|e| NodeError::Unavailable(e.to_string()))?;
        debug!(topic = %topic, url = %self.event_url, "node event stream opened");

        // The sink rides along so pongs and the close handshake can be written.
        let events = futures::stream::unfold(
            (sink, stream, topic.clone()),
            |(sink, mut stream, topic)| async move {
                loop {
                    match stream.next().await? {
                        Ok(Message::Text(text)) => match parse_frame(&topic, &text) {
                            Frame::Event(event) => return Some((event, (sink, stream, topic))),
                            Frame::Ignored => continue,
                            Frame::Failed(message) => {
                                warn!(topic = %topic, error = %message, "node refused subscription");
                                return None;
                            }
                        },
                        Ok(Message::Close(_)) => return None,
                        Ok(_) => continue,
                        Err(e) => {
                            debug!(topic = %topic, error = %e, "node event stream failed");
                            return None;
                        }
                    }
                }
            },
        );
        Ok(events.boxed())
    }
}

enum Frame {
    Event(Event),
    Ignored,
    Failed(String),
}

fn parse_frame(topic: &Topic, text: &str) -> Frame {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Frame::Ignored;
    };
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("subscription error");
        return Frame::Failed(message.to_string());
    }
    match value.pointer("/result/data") {
        Some(data) => Frame::Event(Event::new(topic.clone(), data.clone())),
        // Subscription acks carry an empty result.
        None => Frame::Ignored,
    }
}

fn decode_value(encoded: &str) -> Result<Value, NodeError> {
    let bytes = hex::decode(encoded)
        .map_err(|e| NodeError::InvalidQuery(format!("undecodable value: {}", e)))?;
    Ok(serde_json::from_slice(&bytes).unwrap_or(Value::String(encoded.to_string())))
}

fn as_height(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use lg_api_gateway::Signature;

    async fn rpc(Json(request): Json<Value>) -> Json<Value> {
        let id = request["id"].clone();
        let params = &request["params"];
        let result = match request["method"].as_str().unwrap_or_default() {
            "status" => json!({
                "node_info": { "network": "test-chain" },
                "sync_info": { "latest_block_height": "42" },
            }),
            "abci_query" => match params["path"].as_str() {
                Some("/account") if params["data"] == hex::encode([1u8; 20]) => json!({
                    "response": {
                        "code": 0,
                        "height": "7",
                        "value": hex::encode(br#"{"coins":[{"denom":"mycoin","amount":10}]}"#),
                    }
                }),
                Some("/account") => json!({ "response": { "code": 0, "height": 7, "value": "" } }),
                _ => json!({ "response": { "code": 1, "log": "unknown path" } }),
            },
            "broadcast_tx_commit" => {
                let raw = hex::decode(params["tx"].as_str().unwrap_or_default()).unwrap();
                let signed: Value = serde_json::from_slice(&raw).unwrap();
                if signed["tx"]["type"] == "bad" {
                    json!({ "check_tx": { "code": 3, "log": "insufficient funds" } })
                } else {
                    json!({
                        "check_tx": { "code": 0 },
                        "deliver_tx": { "code": 0 },
                        "hash": "ABCD",
                        "height": 9,
                    })
                }
            }
            _ => {
                return Json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32601, "message": "method not found" },
                }))
            }
        };
        Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
    }

    async fn events(ws: WebSocketUpgrade) -> axum::response::Response {
        ws.on_upgrade(|mut socket: WebSocket| async move {
            let Some(Ok(WsMessage::Text(request))) = socket.recv().await else {
                return;
            };
            let request: Value = serde_json::from_str(&request).unwrap();
            let id = request["id"].clone();
            let topic = request["params"]["event"].as_str().unwrap_or_default().to_string();
            if topic == "forbidden" {
                let _ = socket
                    .send(WsMessage::Text(
                        json!({ "jsonrpc": "2.0", "id": id, "error": { "message": "no" } })
                            .to_string(),
                    ))
                    .await;
                return;
            }
            let frames = [
                json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
                json!({ "jsonrpc": "2.0", "id": id, "result": { "name": topic, "data": { "n": 1 } } }),
                json!({ "jsonrpc": "2.0", "id": id, "result": { "name": topic, "data": { "n": 2 } } }),
            ];
            for frame in frames {
                let _ = socket.send(WsMessage::Text(frame.to_string())).await;
            }
            let _ = socket.send(WsMessage::Close(None)).await;
        })
    }

    async fn fake_node() -> RpcNodeClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route("/", post(rpc))
            .route("/websocket", get(events));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = NodeConfig {
            rpc_url: format!("http://{}", addr),
            ws_url: None,
        };
        RpcNodeClient::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn signed(kind: &str) -> SignedTx {
        SignedTx {
            tx: json!({ "type": kind, "sequence": 1, "data": {} }),
            signature: Signature {
                algo: "ed25519".into(),
                pub_key: "aa".into(),
                signature: "bb".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_status_accepts_string_heights() {
        let node = fake_node().await;
        let status = node.status().await.unwrap();
        assert_eq!(status.network, "test-chain");
        assert_eq!(status.latest_height, 42);
    }

    #[tokio::test]
    async fn test_query_decodes_hex_json() {
        let node = fake_node().await;
        let response = node.query("/account", &[1u8; 20]).await.unwrap();
        assert_eq!(response.height, 7);
        assert_eq!(response.value["coins"][0]["amount"], 10);

        let missing = node.query("/account", &[2u8; 20]).await.unwrap();
        assert!(missing.value.is_null());
    }

    #[tokio::test]
    async fn test_query_failure_is_invalid_query() {
        let node = fake_node().await;
        let err = node.query("/nope", b"").await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_broadcast_returns_result_or_rejection() {
        let node = fake_node().await;
        let receipt = node.broadcast(&signed("coin/send")).await.unwrap();
        assert_eq!(receipt.0["hash"], "ABCD");

        let err = node.broadcast(&signed("bad")).await.unwrap_err();
        assert!(matches!(err, NodeError::Rejected(ref m) if m.contains("insufficient funds")));
    }

    #[tokio::test]
    async fn test_subscribe_streams_event_payloads() {
        let node = fake_node().await;
        let topic = Topic::parse("NewBlock").unwrap();
        let events: Vec<Event> = node.subscribe(&topic).await.unwrap().collect().await;
        let payloads: Vec<Value> = events.iter().map(|e| e.payload.clone()).collect();
        assert_eq!(payloads, vec![json!({ "n": 1 }), json!({ "n": 2 })]);
        assert!(events.iter().all(|e| e.topic == topic));
    }

    #[tokio::test]
    async fn test_refused_subscription_ends_stream() {
        let node = fake_node().await;
        let topic = Topic::parse("forbidden").unwrap();
        let events: Vec<Event> = node.subscribe(&topic).await.unwrap().collect().await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_node_is_unavailable() {
        let config = NodeConfig {
            rpc_url: "http://127.0.0.1:1".into(),
            ws_url: None,
        };
        let node = RpcNodeClient::new(&config, Duration::from_secs(1)).unwrap();
        assert!(matches!(node.status().await, Err(NodeError::Unavailable(_))));
        assert!(matches!(
            node.subscribe(&Topic::parse("tx").unwrap()).await,
            Err(NodeError::Unavailable(_))
        ));
    }
}
