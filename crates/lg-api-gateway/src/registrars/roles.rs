//! `POST /build/create_role`.

use super::{bind, TxSigner};
use crate::domain::{ApiError, ApiResult, CreateRoleRequest, GatewayError};
use crate::router::{Registrar, RouteRequest, RouteScope};
use axum::http::Method;
use serde_json::Value;

#[derive(Clone)]
pub struct RolesRegistrar {
    signer: TxSigner,
}

impl RolesRegistrar {
    pub fn new(signer: TxSigner) -> Self {
        Self { signer }
    }

    async fn create_role(self, req: RouteRequest) -> ApiResult<Value> {
        let body: CreateRoleRequest = req.json()?;
        body.validate().map_err(ApiError::bad_request)?;
        self.signer.finish(body.build(), body.signer.as_ref()).await
    }
}

impl Registrar for RolesRegistrar {
    fn name(&self) -> &'static str {
        "roles"
    }

    fn register(&self, routes: &mut RouteScope<'_>) -> Result<(), GatewayError> {
        routes.route(
            Method::POST,
            "/build/create_role",
            bind(self, Self::create_role),
        )?;
        Ok(())
    }
}
