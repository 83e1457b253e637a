//! `POST /sign`: sign a client-supplied transaction body.

use super::{bind, require};
use crate::domain::{sign_bytes, ApiError, ApiResult, GatewayError, SignRequest, SignedTx};
use crate::ports::{bounded, KeyManager};
use crate::router::{Registrar, RouteRequest, RouteScope};
use axum::http::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct SignRegistrar {
    keys: Arc<dyn KeyManager>,
    call_timeout: Duration,
}

impl SignRegistrar {
    pub fn new(keys: Arc<dyn KeyManager>, call_timeout: Duration) -> Self {
        Self { keys, call_timeout }
    }

    async fn sign(self, req: RouteRequest) -> ApiResult<Value> {
        let body: SignRequest = req.json()?;
        require("name", &body.name)?;
        if !body.tx.is_object() {
            return Err(ApiError::bad_request("'tx' must be a JSON object"));
        }

        let payload = sign_bytes(&body.tx).map_err(|e| ApiError::internal(e.to_string()))?;
        let signature = bounded(
            self.call_timeout,
            "key manager sign",
            self.keys.sign(&body.name, &body.passphrase, &payload),
        )
        .await?;

        Ok(json!(SignedTx {
            tx: body.tx,
            signature,
        }))
    }
}

impl Registrar for SignRegistrar {
    fn name(&self) -> &'static str {
        "sign"
    }

    fn register(&self, routes: &mut RouteScope<'_>) -> Result<(), GatewayError> {
        routes.route(Method::POST, "/sign", bind(self, Self::sign))?;
        Ok(())
    }
}
