//! Test fixtures: a gateway served on an ephemeral port and a small
//! WebSocket client speaking the event protocol.

use futures::{SinkExt, StreamExt};
use lg_api_gateway::registrars::default_registrars;
use lg_api_gateway::testing::{FakeNodeClient, InMemoryKeyManager};
use lg_api_gateway::{GatewayConfig, GatewayError, GatewayService, KeyManager};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// How long a test waits for any single expected frame or condition.
pub const WAIT: Duration = Duration::from_secs(5);

pub struct TestGateway {
    pub addr: SocketAddr,
    pub node: Arc<FakeNodeClient>,
    pub service: GatewayService,
    pub http: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<Result<(), GatewayError>>,
}

impl TestGateway {
    /// Gateway with default config, a fake node and in-memory keys.
    pub async fn start() -> Self {
        Self::start_with(
            test_config(),
            Arc::new(FakeNodeClient::new()),
            Arc::new(InMemoryKeyManager::new()),
        )
        .await
    }

    pub async fn start_with(
        config: GatewayConfig,
        node: Arc<FakeNodeClient>,
        keys: Arc<dyn KeyManager>,
    ) -> Self {
        let registrars = default_registrars(keys, node.clone(), config.timeouts.call);
        let service = GatewayService::new(config, node.clone(), registrars).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, signal) = oneshot::channel::<()>();
        let server = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .serve(listener, async {
                        let _ = signal.await;
                    })
                    .await
            })
        };

        Self {
            addr,
            node,
            service,
            http: reqwest::Client::new(),
            shutdown: Some(shutdown),
            server,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> (u16, Value) {
        let response = self.http.get(self.url(path)).send().await.unwrap();
        read(response).await
    }

    pub async fn send(&self, method: reqwest::Method, path: &str, body: Value) -> (u16, Value) {
        let response = self
            .http
            .request(method, self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        read(response).await
    }

    pub async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        self.send(reqwest::Method::POST, path, body).await
    }

    pub async fn connect(&self) -> WsClient {
        let url = format!("ws://{}/websocket", self.addr);
        let (socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        WsClient { socket }
    }

    /// Trigger graceful shutdown and wait for the server to stop.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(WAIT, &mut self.server)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Default config with short timeouts and fast upstream retry.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.timeouts.call = Duration::from_secs(2);
    config.timeouts.request = Duration::from_secs(5);
    config.upstream.reconnect_base = Duration::from_millis(20);
    config.upstream.reconnect_max = Duration::from_millis(100);
    config
}

async fn read(response: reqwest::Response) -> (u16, Value) {
    let status = response.status().as_u16();
    let bytes = response.bytes().await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// Poll `cond` until it holds or [`WAIT`] elapses.
pub async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub struct WsClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn send_text(&mut self, text: &str) {
        self.socket.send(Message::Text(text.to_string())).await.unwrap();
    }

    pub async fn send_json(&mut self, value: Value) {
        self.send_text(&value.to_string()).await;
    }

    /// Next JSON text frame, skipping control frames. `None` once closed.
    pub async fn next_json(&mut self) -> Option<Value> {
        loop {
            let frame = tokio::time::timeout(WAIT, self.socket.next())
                .await
                .expect("no frame within deadline")?;
            match frame {
                Ok(Message::Text(text)) => return Some(serde_json::from_str(&text).unwrap()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    pub async fn expect_json(&mut self) -> Value {
        self.next_json().await.expect("connection closed")
    }

    pub async fn subscribe(&mut self, topic: &str) {
        self.send_json(json!({ "type": "subscribe", "topic": topic })).await;
        let ack = self.expect_json().await;
        assert_eq!(ack, json!({ "type": "subscribed", "topic": topic }));
    }

    pub async fn unsubscribe(&mut self, topic: &str) {
        self.send_json(json!({ "type": "unsubscribe", "topic": topic })).await;
        let ack = self.expect_json().await;
        assert_eq!(ack, json!({ "type": "unsubscribed", "topic": topic }));
    }

    /// Assert nothing arrives for `quiet`.
    pub async fn expect_silence(&mut self, quiet: Duration) {
        if let Ok(Some(Ok(Message::Text(text)))) =
            tokio::time::timeout(quiet, self.socket.next()).await
        {
            panic!("unexpected frame: {}", text);
        }
    }

    pub async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}
