//! # Event Fan-out over WebSocket
//!
//! One upstream stream per topic regardless of subscriber count, events
//! delivered to every subscriber in node order, and no leftovers once
//! connections go away.

#[cfg(test)]
mod tests {
    use crate::harness::{wait_for, TestGateway};
    use lg_api_gateway::Topic;
    use serde_json::json;
    use std::time::Duration;

    fn topic(name: &str) -> Topic {
        Topic::parse(name).unwrap()
    }

    #[tokio::test]
    async fn test_two_subscribers_share_one_upstream() {
        let gw = TestGateway::start().await;
        let mut c1 = gw.connect().await;
        let mut c2 = gw.connect().await;

        c1.subscribe("tx").await;
        c2.subscribe("tx").await;
        wait_for("upstream join", || gw.node.live_streams(&topic("tx")) == 1).await;
        assert_eq!(gw.node.subscribe_calls(&topic("tx")), 1);

        gw.node.emit(&topic("tx"), json!({ "n": 1 }));
        gw.node.emit(&topic("tx"), json!({ "n": 2 }));

        for client in [&mut c1, &mut c2] {
            assert_eq!(
                client.expect_json().await,
                json!({ "type": "event", "topic": "tx", "payload": { "n": 1 } })
            );
            assert_eq!(
                client.expect_json().await,
                json!({ "type": "event", "topic": "tx", "payload": { "n": 2 } })
            );
        }
    }

    #[tokio::test]
    async fn test_only_subscribed_topics_are_delivered() {
        let gw = TestGateway::start().await;
        let mut client = gw.connect().await;
        client.subscribe("tx").await;
        wait_for("upstream join", || gw.node.live_streams(&topic("tx")) == 1).await;

        assert_eq!(gw.node.emit(&topic("NewBlock"), json!({ "height": 1 })), 0);
        gw.node.emit(&topic("tx"), json!({ "id": "E1" }));
        gw.node.emit(&topic("tx"), json!({ "id": "E2" }));

        assert_eq!(client.expect_json().await["payload"]["id"], "E1");
        assert_eq!(client.expect_json().await["payload"]["id"], "E2");
        client.expect_silence(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_upstream_released_after_last_unsubscribe() {
        let gw = TestGateway::start().await;
        let manager = gw.service.subscriptions();
        let mut c1 = gw.connect().await;
        let mut c2 = gw.connect().await;

        c1.subscribe("tx").await;
        c2.subscribe("tx").await;
        wait_for("upstream join", || gw.node.live_streams(&topic("tx")) == 1).await;

        c1.unsubscribe("tx").await;
        assert_eq!(manager.subscriber_count(&topic("tx")), 1);
        assert_eq!(gw.node.live_streams(&topic("tx")), 1);

        c2.unsubscribe("tx").await;
        wait_for("upstream release", || gw.node.live_streams(&topic("tx")) == 0).await;
        assert!(manager.active_topics().is_empty());

        c1.subscribe("tx").await;
        wait_for("upstream rejoin", || gw.node.live_streams(&topic("tx")) == 1).await;
        assert_eq!(gw.node.subscribe_calls(&topic("tx")), 2);
    }

    #[tokio::test]
    async fn test_disconnect_releases_all_subscriptions() {
        let gw = TestGateway::start().await;
        let manager = gw.service.subscriptions();
        let mut client = gw.connect().await;

        client.subscribe("A").await;
        client.subscribe("B").await;
        wait_for("both joins", || {
            gw.node.live_streams(&topic("A")) == 1 && gw.node.live_streams(&topic("B")) == 1
        })
        .await;

        client.close().await;
        wait_for("connection removed", || manager.connection_count() == 0).await;
        wait_for("upstreams released", || {
            gw.node.live_streams(&topic("A")) == 0 && gw.node.live_streams(&topic("B")) == 0
        })
        .await;
        assert!(manager.active_topics().is_empty());
        assert_eq!(manager.total_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_control_errors_stay_on_connection() {
        let gw = TestGateway::start().await;
        let mut bad = gw.connect().await;
        let mut good = gw.connect().await;
        good.subscribe("tx").await;

        bad.send_text("{not json").await;
        let err = bad.expect_json().await;
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], -32700);

        bad.send_json(json!({ "type": "dance", "topic": "tx" })).await;
        assert_eq!(bad.expect_json().await["code"], -32600);

        bad.send_json(json!({ "type": "subscribe" })).await;
        assert_eq!(bad.expect_json().await["code"], -32602);

        bad.send_json(json!({ "type": "unsubscribe", "topic": "never" })).await;
        assert_eq!(bad.expect_json().await["code"], -32000);

        // Still usable afterwards.
        bad.subscribe("tx").await;
        wait_for("upstream join", || gw.node.live_streams(&topic("tx")) == 1).await;
        gw.node.emit(&topic("tx"), json!(1));
        assert_eq!(bad.expect_json().await["payload"], 1);
        assert_eq!(good.expect_json().await["payload"], 1);
    }

    #[tokio::test]
    async fn test_node_calls_share_the_event_socket() {
        let gw = TestGateway::start().await;
        let account = [7u8; 20];
        gw.node.set_query("/nonce", &account, json!(12));

        let mut client = gw.connect().await;
        client.subscribe("tx").await;
        wait_for("upstream join", || gw.node.live_streams(&topic("tx")) == 1).await;

        client.send_json(json!({ "type": "call", "id": 1, "method": "status" })).await;
        let reply = client.expect_json().await;
        assert_eq!(reply["type"], "result");
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["network"], "fake-chain");

        client
            .send_json(json!({
                "type": "call",
                "id": "nonce-1",
                "method": "abci_query",
                "params": { "path": "/nonce", "data": hex::encode(account) },
            }))
            .await;
        let reply = client.expect_json().await;
        assert_eq!(reply["id"], "nonce-1");
        assert_eq!(reply["result"]["value"], 12);

        client
            .send_json(json!({
                "type": "call",
                "id": 3,
                "method": "broadcast_tx",
                "params": {
                    "tx": { "type": "coin/send", "sequence": 1, "data": {} },
                    "signature": { "algo": "ed25519", "pub_key": "aa", "signature": "bb" },
                },
            }))
            .await;
        let reply = client.expect_json().await;
        assert_eq!(reply["type"], "result");
        assert_eq!(reply["id"], 3);
        assert_eq!(gw.node.broadcasts().len(), 1);

        client
            .send_json(json!({
                "type": "call",
                "id": 4,
                "method": "broadcast_tx",
                "params": { "tx": "not-an-object", "signature": {} },
            }))
            .await;
        let reply = client.expect_json().await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], -32602);
        assert_eq!(gw.node.broadcasts().len(), 1);

        client.send_json(json!({ "type": "call", "id": 5, "method": "net_info" })).await;
        assert_eq!(client.expect_json().await["code"], -32601);

        // The subscription is untouched by the calls.
        gw.node.emit(&topic("tx"), json!({ "n": 1 }));
        assert_eq!(client.expect_json().await["payload"]["n"], 1);
    }

    #[tokio::test]
    async fn test_subscription_limit_per_connection() {
        let mut config = crate::harness::test_config();
        config.websocket.max_subscriptions_per_connection = 2;
        let gw = TestGateway::start_with(
            config,
            std::sync::Arc::new(lg_api_gateway::testing::FakeNodeClient::new()),
            std::sync::Arc::new(lg_api_gateway::testing::InMemoryKeyManager::new()),
        )
        .await;
        let mut client = gw.connect().await;

        client.subscribe("a").await;
        client.subscribe("b").await;
        client.send_json(json!({ "type": "subscribe", "topic": "c" })).await;
        let err = client.expect_json().await;
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], -32000);
    }

    #[tokio::test]
    async fn test_upstream_loss_recovers_without_dropping_clients() {
        let gw = TestGateway::start().await;
        let manager = gw.service.subscriptions();
        let mut client = gw.connect().await;
        client.subscribe("tx").await;
        wait_for("upstream join", || gw.node.live_streams(&topic("tx")) == 1).await;

        gw.node.drop_streams(&topic("tx"));
        wait_for("upstream rejoin", || gw.node.subscribe_calls(&topic("tx")) >= 2).await;
        wait_for("stream live again", || gw.node.live_streams(&topic("tx")) == 1).await;
        wait_for("healthy again", || manager.is_upstream_healthy(&topic("tx")) == Some(true)).await;

        gw.node.emit(&topic("tx"), json!({ "after": "reconnect" }));
        assert_eq!(client.expect_json().await["payload"]["after"], "reconnect");
    }

    #[tokio::test]
    async fn test_shutdown_closes_event_connections() {
        let gw = TestGateway::start().await;
        let mut client = gw.connect().await;
        client.subscribe("tx").await;

        gw.stop().await;
        assert!(client.next_json().await.is_none());
    }
}
