//! Key CRUD routes.

use super::{bind, require};
use crate::domain::{ApiResult, GatewayError};
use crate::ports::{bounded, KeyManager};
use crate::router::{Registrar, RouteRequest, RouteScope};
use axum::http::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct CreateKeyBody {
    name: String,
    passphrase: String,
    #[serde(default)]
    algo: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateKeyBody {
    old_passphrase: String,
    new_passphrase: String,
}

#[derive(Debug, Deserialize)]
struct DeleteKeyBody {
    passphrase: String,
}

/// `GET/POST /keys`, `GET/PUT/DELETE /keys/{name}`.
#[derive(Clone)]
pub struct KeysRegistrar {
    keys: Arc<dyn KeyManager>,
    call_timeout: Duration,
}

impl KeysRegistrar {
    pub fn new(keys: Arc<dyn KeyManager>, call_timeout: Duration) -> Self {
        Self { keys, call_timeout }
    }

    async fn list(self, _req: RouteRequest) -> ApiResult<Value> {
        let keys = bounded(self.call_timeout, "key manager list", self.keys.list()).await?;
        Ok(json!(keys))
    }

    async fn create(self, req: RouteRequest) -> ApiResult<Value> {
        let body: CreateKeyBody = req.json()?;
        require("name", &body.name)?;
        require("passphrase", &body.passphrase)?;

        let info = bounded(
            self.call_timeout,
            "key manager create",
            self.keys
                .create(&body.name, &body.passphrase, body.algo.as_deref()),
        )
        .await?;
        tracing::info!(key = %info.name, address = %info.address, "key created");
        Ok(json!(info))
    }

    async fn get(self, req: RouteRequest) -> ApiResult<Value> {
        let name = req.param("name")?;
        let info = bounded(self.call_timeout, "key manager get", self.keys.get(name)).await?;
        Ok(json!(info))
    }

    async fn update(self, req: RouteRequest) -> ApiResult<Value> {
        let name = req.param("name")?;
        let body: UpdateKeyBody = req.json()?;
        require("new_passphrase", &body.new_passphrase)?;

        let info = bounded(
            self.call_timeout,
            "key manager update",
            self.keys
                .update(name, &body.old_passphrase, &body.new_passphrase),
        )
        .await?;
        Ok(json!(info))
    }

    async fn delete(self, req: RouteRequest) -> ApiResult<Value> {
        let name = req.param("name")?;
        let body: DeleteKeyBody = req.json()?;
        bounded(
            self.call_timeout,
            "key manager delete",
            self.keys.delete(name, &body.passphrase),
        )
        .await?;
        tracing::info!(key = %name, "key deleted");
        Ok(json!({ "deleted": name }))
    }
}

impl Registrar for KeysRegistrar {
    fn name(&self) -> &'static str {
        "keys"
    }

    fn register(&self, routes: &mut RouteScope<'_>) -> Result<(), GatewayError> {
        routes
            .route(Method::GET, "/keys", bind(self, Self::list))?
            .route(Method::POST, "/keys", bind(self, Self::create))?
            .route(Method::GET, "/keys/{name}", bind(self, Self::get))?
            .route(Method::PUT, "/keys/{name}", bind(self, Self::update))?
            .route(Method::DELETE, "/keys/{name}", bind(self, Self::delete))?;
        Ok(())
    }
}
