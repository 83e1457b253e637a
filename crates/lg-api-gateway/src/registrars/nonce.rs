//! `GET /query/nonce/{address}`.

use super::{address_param, bind, query_address};
use crate::domain::{ApiResult, GatewayError};
use crate::ports::NodeClient;
use crate::router::{Registrar, RouteRequest, RouteScope};
use axum::http::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Node query path for account nonces.
pub const NONCE_QUERY_PATH: &str = "/nonce";

#[derive(Clone)]
pub struct NonceRegistrar {
    node: Arc<dyn NodeClient>,
    call_timeout: Duration,
}

impl NonceRegistrar {
    pub fn new(node: Arc<dyn NodeClient>, call_timeout: Duration) -> Self {
        Self { node, call_timeout }
    }

    async fn nonce(self, req: RouteRequest) -> ApiResult<Value> {
        let address = address_param(&req)?;
        query_address(
            self.node.as_ref(),
            self.call_timeout,
            NONCE_QUERY_PATH,
            address,
            "nonce",
        )
        .await
    }
}

impl Registrar for NonceRegistrar {
    fn name(&self) -> &'static str {
        "nonce"
    }

    fn register(&self, routes: &mut RouteScope<'_>) -> Result<(), GatewayError> {
        routes.route(
            Method::GET,
            "/query/nonce/{address}",
            bind(self, Self::nonce),
        )?;
        Ok(())
    }
}
