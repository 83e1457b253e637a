//! Registrars: one per functional area of the ledger REST surface.
//!
//! Each registrar is a stateless translator. It decodes the request, calls
//! its collaborators under the configured call timeout and encodes the
//! result. Collaborators are injected at construction.

mod coin;
mod keys;
mod nonce;
mod roles;
mod sign;
mod txs;

pub use coin::CoinRegistrar;
pub use keys::KeysRegistrar;
pub use nonce::NonceRegistrar;
pub use roles::RolesRegistrar;
pub use sign::SignRegistrar;
pub use txs::PostTxRegistrar;

use crate::domain::{sign_bytes, Address, ApiError, ApiResult, SignedTx, SignerRef, UnsignedTx};
use crate::ports::{bounded, KeyManager, NodeClient};
use crate::router::{handler, Handler, Registrar, RouteRequest};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// The production registrar list, in composition order.
pub fn default_registrars(
    keys: Arc<dyn KeyManager>,
    node: Arc<dyn NodeClient>,
    call_timeout: Duration,
) -> Vec<Box<dyn Registrar>> {
    let signer = TxSigner {
        keys: keys.clone(),
        node: node.clone(),
        call_timeout,
    };
    vec![
        Box::new(KeysRegistrar::new(keys.clone(), call_timeout)),
        Box::new(CoinRegistrar::new(signer.clone())),
        Box::new(RolesRegistrar::new(signer)),
        Box::new(SignRegistrar::new(keys, call_timeout)),
        Box::new(PostTxRegistrar::new(node.clone(), call_timeout)),
        Box::new(NonceRegistrar::new(node, call_timeout)),
    ]
}

/// Bind an async method of a cloneable registrar as a route handler.
fn bind<R, F, Fut>(registrar: &R, f: F) -> Handler
where
    R: Clone + Send + Sync + 'static,
    F: Fn(R, RouteRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiResult<Value>> + Send + 'static,
{
    let this = registrar.clone();
    handler(move |req| f(this.clone(), req))
}

/// Parse an `{address}` path parameter.
fn address_param(req: &RouteRequest) -> ApiResult<Address> {
    req.param("address")?
        .parse()
        .map_err(ApiError::bad_request)
}

fn require(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(format!("'{}' must not be empty", field)));
    }
    Ok(())
}

/// Signs built transactions and optionally broadcasts them.
#[derive(Clone)]
pub struct TxSigner {
    keys: Arc<dyn KeyManager>,
    node: Arc<dyn NodeClient>,
    call_timeout: Duration,
}

impl TxSigner {
    pub fn new(keys: Arc<dyn KeyManager>, node: Arc<dyn NodeClient>, call_timeout: Duration) -> Self {
        Self {
            keys,
            node,
            call_timeout,
        }
    }

    pub async fn sign(&self, signer: &SignerRef, tx: Value) -> ApiResult<SignedTx> {
        let payload = sign_bytes(&tx).map_err(|e| ApiError::internal(e.to_string()))?;
        let signature = bounded(
            self.call_timeout,
            "key manager sign",
            self.keys.sign(&signer.name, &signer.passphrase, &payload),
        )
        .await?;
        Ok(SignedTx { tx, signature })
    }

    /// Without a signer the unsigned transaction is returned for the client
    /// to sign. With one it is signed, broadcast, and the receipt returned
    /// alongside the signed body.
    pub async fn finish(&self, unsigned: UnsignedTx, signer: Option<&SignerRef>) -> ApiResult<Value> {
        let tx = serde_json::to_value(&unsigned).map_err(|e| ApiError::internal(e.to_string()))?;
        let Some(signer) = signer else {
            return Ok(tx);
        };

        let signed = self.sign(signer, tx).await?;
        let receipt = bounded(
            self.call_timeout,
            "node broadcast",
            self.node.broadcast(&signed),
        )
        .await?;
        tracing::info!(tx_type = %unsigned.kind, signer = %signer.name, "transaction broadcast");
        Ok(serde_json::json!({ "signed": signed, "receipt": receipt }))
    }

    pub fn node(&self) -> &Arc<dyn NodeClient> {
        &self.node
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}

/// Query `path` for `address` and wrap the value under `field`.
/// A null node value means the address has no such state.
async fn query_address(
    node: &dyn NodeClient,
    call_timeout: Duration,
    path: &str,
    address: Address,
    field: &str,
) -> ApiResult<Value> {
    let response = bounded(call_timeout, "node query", node.query(path, address.as_bytes())).await?;
    if response.value.is_null() {
        return Err(ApiError::not_found(format!("no {} for address {}", field, address)));
    }

    let mut body = serde_json::Map::new();
    body.insert("address".into(), Value::String(address.to_hex()));
    body.insert("height".into(), Value::from(response.height));
    body.insert(field.into(), response.value);
    Ok(Value::Object(body))
}
