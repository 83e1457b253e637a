//! # Registrar Routes over HTTP
//!
//! Every default registrar answers its routes through the composed router,
//! errors come back as `{"error": {"kind", "message"}}`, and malformed input
//! never reaches the node.

#[cfg(test)]
mod tests {
    use crate::harness::TestGateway;
    use lg_api_gateway::testing::{FakeNodeClient, InMemoryKeyManager};
    use lg_api_gateway::Receipt;
    use reqwest::Method;
    use serde_json::{json, Value};
    use std::sync::Arc;

    const ALICE: &str = "0101010101010101010101010101010101010101";
    const BOB: &str = "0202020202020202020202020202020202020202";

    async fn create_key(gw: &TestGateway, name: &str, passphrase: &str) -> Value {
        let (status, body) = gw
            .post("/keys", json!({ "name": name, "passphrase": passphrase }))
            .await;
        assert_eq!(status, 200, "create key: {}", body);
        body
    }

    // =========================================================================
    // KEYS
    // =========================================================================

    #[tokio::test]
    async fn test_key_lifecycle() {
        let gw = TestGateway::start().await;

        let created = create_key(&gw, "alice", "pw").await;
        assert_eq!(created["name"], "alice");
        assert_eq!(created["algo"], "ed25519");

        let (status, list) = gw.get("/keys").await;
        assert_eq!(status, 200);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, got) = gw.get("/keys/alice").await;
        assert_eq!(status, 200);
        assert_eq!(got, created);

        let (status, _) = gw
            .send(
                Method::PUT,
                "/keys/alice",
                json!({ "old_passphrase": "pw", "new_passphrase": "pw2" }),
            )
            .await;
        assert_eq!(status, 200);

        let (status, body) = gw
            .send(Method::DELETE, "/keys/alice", json!({ "passphrase": "pw" }))
            .await;
        assert_eq!(status, 401);
        assert_eq!(body["error"]["kind"], "unauthorized");

        let (status, body) = gw
            .send(Method::DELETE, "/keys/alice", json!({ "passphrase": "pw2" }))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({ "deleted": "alice" }));

        let (status, body) = gw.get("/keys/alice").await;
        assert_eq!(status, 404);
        assert_eq!(body["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_duplicate_key_is_conflict() {
        let gw = TestGateway::start().await;
        create_key(&gw, "alice", "pw").await;

        let (status, body) = gw
            .post("/keys", json!({ "name": "alice", "passphrase": "other" }))
            .await;
        assert_eq!(status, 409);
        assert_eq!(body["error"]["kind"], "conflict");
    }

    // =========================================================================
    // ROUTER
    // =========================================================================

    #[tokio::test]
    async fn test_unknown_route_is_not_found_without_node_call() {
        let gw = TestGateway::start().await;

        let (status, body) = gw.get("/query/balance/abc").await;
        assert_eq!(status, 404);
        assert_eq!(body["error"]["kind"], "not_found");

        let (status, _) = gw.send(Method::PATCH, "/keys", json!({})).await;
        assert_eq!(status, 404);
        assert!(gw.node.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let gw = TestGateway::start().await;
        let response = gw
            .http
            .post(gw.url("/keys"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"]["kind"], "bad_request");
    }

    // =========================================================================
    // TRANSACTIONS
    // =========================================================================

    #[tokio::test]
    async fn test_post_tx_returns_receipt_unchanged() {
        let receipt = json!({ "hash": "CAFE", "height": 77, "deliver_tx": { "code": 0, "data": "xyz" } });
        let node = Arc::new(FakeNodeClient::new().with_receipt(Receipt(receipt.clone())));
        let gw = TestGateway::start_with(
            crate::harness::test_config(),
            node,
            Arc::new(InMemoryKeyManager::new()),
        )
        .await;

        let signed = json!({
            "tx": { "type": "coin/send", "sequence": 1, "data": {} },
            "signature": { "algo": "ed25519", "pub_key": "aa", "signature": "bb" },
        });
        let (status, body) = gw.post("/tx", signed).await;
        assert_eq!(status, 200);
        assert_eq!(body, receipt);
        assert_eq!(gw.node.broadcasts().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_tx_never_reaches_node() {
        let gw = TestGateway::start().await;

        for bad in [
            json!({ "tx": "not-an-object", "signature": { "algo": "ed25519", "pub_key": "aa", "signature": "bb" } }),
            json!({ "tx": {}, "signature": { "algo": "ed25519", "pub_key": "", "signature": "" } }),
            json!({ "signature": {} }),
        ] {
            let (status, body) = gw.post("/tx", bad).await;
            assert_eq!(status, 400, "{}", body);
        }
        assert!(gw.node.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_tx_is_unprocessable() {
        let node = Arc::new(FakeNodeClient::new().rejecting("bad nonce"));
        let gw = TestGateway::start_with(
            crate::harness::test_config(),
            node,
            Arc::new(InMemoryKeyManager::new()),
        )
        .await;

        let signed = json!({
            "tx": { "type": "coin/send", "sequence": 1, "data": {} },
            "signature": { "algo": "ed25519", "pub_key": "aa", "signature": "bb" },
        });
        let (status, body) = gw.post("/tx", signed).await;
        assert_eq!(status, 422);
        assert_eq!(body["error"]["kind"], "rejected");
    }

    #[tokio::test]
    async fn test_build_send_unsigned_and_signed() {
        let gw = TestGateway::start().await;
        let request = json!({
            "from": ALICE,
            "to": BOB,
            "amount": [{ "denom": "mycoin", "amount": 5 }],
            "sequence": 1,
        });

        let (status, unsigned) = gw.post("/build/send", request.clone()).await;
        assert_eq!(status, 200);
        assert_eq!(unsigned["type"], "coin/send");
        assert_eq!(unsigned["data"]["to"], BOB);
        assert!(gw.node.broadcasts().is_empty());

        create_key(&gw, "alice", "pw").await;
        let mut signed_request = request;
        signed_request["signer"] = json!({ "name": "alice", "passphrase": "pw" });
        let (status, body) = gw.post("/build/send", signed_request).await;
        assert_eq!(status, 200, "{}", body);
        assert_eq!(body["signed"]["tx"], unsigned);
        assert!(body["receipt"].is_object());
        assert_eq!(gw.node.broadcasts().len(), 1);
    }

    #[tokio::test]
    async fn test_build_create_role() {
        let gw = TestGateway::start().await;
        let (status, tx) = gw
            .post(
                "/build/create_role",
                json!({ "role": "treasury", "min_sigs": 2, "signers": [ALICE, BOB], "sequence": 3 }),
            )
            .await;
        assert_eq!(status, 200, "{}", tx);
        assert_eq!(tx["type"], "role/create");
        assert_eq!(tx["sequence"], 3);
    }

    #[tokio::test]
    async fn test_sign_endpoint() {
        let gw = TestGateway::start().await;
        let key = create_key(&gw, "alice", "pw").await;

        let (status, signed) = gw
            .post(
                "/sign",
                json!({ "name": "alice", "passphrase": "pw", "tx": { "type": "coin/send" } }),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(signed["signature"]["pub_key"], key["pub_key"]);
        assert!(gw.node.broadcasts().is_empty());
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    #[tokio::test]
    async fn test_account_and_nonce_queries() {
        let gw = TestGateway::start().await;
        let alice = hex::decode(ALICE).unwrap();
        gw.node
            .set_query("/account", &alice, json!({ "coins": [{ "denom": "mycoin", "amount": 10 }] }));
        gw.node.set_query("/nonce", &alice, json!(4));

        let (status, body) = gw.get(&format!("/query/account/{}", ALICE)).await;
        assert_eq!(status, 200);
        assert_eq!(body["address"], ALICE);
        assert_eq!(body["account"]["coins"][0]["amount"], 10);

        let (status, body) = gw.get(&format!("/query/nonce/{}", ALICE)).await;
        assert_eq!(status, 200);
        assert_eq!(body["nonce"], 4);

        let (status, _) = gw.get(&format!("/query/account/{}", BOB)).await;
        assert_eq!(status, 404);

        let (status, _) = gw.get("/query/account/not-hex").await;
        assert_eq!(status, 400);
    }

    // =========================================================================
    // SERVICE ROUTES
    // =========================================================================

    #[tokio::test]
    async fn test_health_and_metrics() {
        let gw = TestGateway::start().await;
        gw.get("/keys").await;

        let (status, health) = gw.get("/health").await;
        assert_eq!(status, 200);
        assert_eq!(health["node"]["network"], "fake-chain");

        let (status, metrics) = gw.get("/metrics").await;
        assert_eq!(status, 200);
        assert!(metrics.is_object());

        let response = gw
            .http
            .get(gw.url("/keys"))
            .header("x-request-id", "trace-me")
            .send()
            .await
            .unwrap();
        assert_eq!(response.headers()["x-request-id"], "trace-me");
    }

    #[tokio::test]
    async fn test_graceful_stop() {
        let gw = TestGateway::start().await;
        let (status, _) = gw.get("/keys").await;
        assert_eq!(status, 200);
        gw.stop().await;
    }
}
