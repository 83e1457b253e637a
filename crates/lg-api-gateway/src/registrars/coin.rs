//! Coin routes: build (and optionally send) a transfer, query an account.

use super::{address_param, bind, query_address, TxSigner};
use crate::domain::{ApiError, ApiResult, GatewayError, SendRequest};
use crate::router::{Registrar, RouteRequest, RouteScope};
use axum::http::Method;
use serde_json::Value;

/// Node query path for account state.
pub const ACCOUNT_QUERY_PATH: &str = "/account";

#[derive(Clone)]
pub struct CoinRegistrar {
    signer: TxSigner,
}

impl CoinRegistrar {
    pub fn new(signer: TxSigner) -> Self {
        Self { signer }
    }

    async fn send(self, req: RouteRequest) -> ApiResult<Value> {
        let body: SendRequest = req.json()?;
        body.validate().map_err(ApiError::bad_request)?;
        self.signer.finish(body.build(), body.signer.as_ref()).await
    }

    async fn account(self, req: RouteRequest) -> ApiResult<Value> {
        let address = address_param(&req)?;
        query_address(
            self.signer.node().as_ref(),
            self.signer.call_timeout(),
            ACCOUNT_QUERY_PATH,
            address,
            "account",
        )
        .await
    }
}

impl Registrar for CoinRegistrar {
    fn name(&self) -> &'static str {
        "coin"
    }

    fn register(&self, routes: &mut RouteScope<'_>) -> Result<(), GatewayError> {
        routes
            .route(Method::POST, "/build/send", bind(self, Self::send))?
            .route(
                Method::GET,
                "/query/account/{address}",
                bind(self, Self::account),
            )?;
        Ok(())
    }
}
