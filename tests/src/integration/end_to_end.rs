//! # End-to-End Flows with the File Key Store
//!
//! The gateway wired to a real on-disk key store: create a key, build and
//! sign a transfer, broadcast it, and watch the node's event reach a
//! subscriber.

#[cfg(test)]
mod tests {
    use crate::harness::{test_config, wait_for, TestGateway};
    use gateway_runtime::{FileKeyStore, KdfCost};
    use lg_api_gateway::testing::FakeNodeClient;
    use lg_api_gateway::Topic;
    use serde_json::json;
    use std::sync::Arc;

    async fn start(dir: &std::path::Path) -> TestGateway {
        let keys = Arc::new(FileKeyStore::open_with(dir.join("keys"), KdfCost::CHEAP).unwrap());
        TestGateway::start_with(test_config(), Arc::new(FakeNodeClient::new()), keys).await
    }

    #[tokio::test]
    async fn test_signed_send_reaches_node_and_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let gw = start(dir.path()).await;

        let (status, alice) = gw
            .post("/keys", json!({ "name": "alice", "passphrase": "correct horse" }))
            .await;
        assert_eq!(status, 200, "{}", alice);
        let (_, bob) = gw
            .post("/keys", json!({ "name": "bob", "passphrase": "battery staple" }))
            .await;

        let mut watcher = gw.connect().await;
        watcher.subscribe("tx").await;
        let tx_topic = Topic::parse("tx").unwrap();
        wait_for("upstream join", || gw.node.live_streams(&tx_topic) == 1).await;

        let (status, body) = gw
            .post(
                "/build/send",
                json!({
                    "from": alice["address"],
                    "to": bob["address"],
                    "amount": [{ "denom": "mycoin", "amount": 25 }],
                    "sequence": 1,
                    "signer": { "name": "alice", "passphrase": "correct horse" },
                }),
            )
            .await;
        assert_eq!(status, 200, "{}", body);
        assert_eq!(body["signed"]["signature"]["pub_key"], alice["pub_key"]);

        let broadcasts = gw.node.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].tx["data"]["to"], bob["address"]);

        // The node announces the committed transaction.
        gw.node.emit(&tx_topic, json!({ "height": 2, "tx": broadcasts[0].tx }));
        let event = watcher.expect_json().await;
        assert_eq!(event["type"], "event");
        assert_eq!(event["payload"]["tx"]["data"]["amount"][0]["amount"], 25);
    }

    #[tokio::test]
    async fn test_wrong_passphrase_does_not_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let gw = start(dir.path()).await;
        let (_, alice) = gw
            .post("/keys", json!({ "name": "alice", "passphrase": "pw" }))
            .await;

        let (status, body) = gw
            .post(
                "/build/send",
                json!({
                    "from": alice["address"],
                    "to": "0202020202020202020202020202020202020202",
                    "amount": [{ "denom": "mycoin", "amount": 1 }],
                    "sequence": 1,
                    "signer": { "name": "alice", "passphrase": "nope" },
                }),
            )
            .await;
        assert_eq!(status, 401, "{}", body);
        assert!(gw.node.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn test_keys_persist_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let created = {
            let gw = start(dir.path()).await;
            let (_, key) = gw
                .post("/keys", json!({ "name": "carol", "passphrase": "pw" }))
                .await;
            gw.stop().await;
            key
        };

        let gw = start(dir.path()).await;
        let (status, key) = gw.get("/keys/carol").await;
        assert_eq!(status, 200);
        assert_eq!(key, created);
    }
}
