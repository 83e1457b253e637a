//! `POST /tx`: broadcast a pre-signed transaction.

use super::bind;
use crate::domain::{ApiError, ApiResult, GatewayError, SignedTx};
use crate::ports::{bounded, NodeClient};
use crate::router::{Registrar, RouteRequest, RouteScope};
use axum::http::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct PostTxRegistrar {
    node: Arc<dyn NodeClient>,
    call_timeout: Duration,
}

impl PostTxRegistrar {
    pub fn new(node: Arc<dyn NodeClient>, call_timeout: Duration) -> Self {
        Self { node, call_timeout }
    }

    /// The node's receipt is passed back unchanged.
    async fn post(self, req: RouteRequest) -> ApiResult<Value> {
        let tx: SignedTx = req.json()?;
        tx.validate().map_err(ApiError::bad_request)?;

        let receipt = bounded(self.call_timeout, "node broadcast", self.node.broadcast(&tx)).await?;
        Ok(receipt.0)
    }
}

impl Registrar for PostTxRegistrar {
    fn name(&self) -> &'static str {
        "post-tx"
    }

    fn register(&self, routes: &mut RouteScope<'_>) -> Result<(), GatewayError> {
        routes.route(Method::POST, "/tx", bind(self, Self::post))?;
        Ok(())
    }
}
