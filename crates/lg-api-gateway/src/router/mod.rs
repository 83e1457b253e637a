//! Request routing and registrar composition.
//!
//! Registrars declare their routes into a [`RouteTable`] once at startup, in
//! a fixed order. Two routes of one method conflict when some path matches
//! both and neither has more literal segments than the other; that is a
//! fatal [`GatewayError::RouteConflict`]. Once every registrar has run the
//! [`Router`] is frozen behind an `Arc` and read without locking.

mod pattern;

pub use pattern::PathPattern;

use crate::domain::{ApiError, ApiResult, GatewayError};
use axum::http::Method;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by a route handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ApiResult<Value>> + Send>>;

/// A route handler. Cloned cheaply into each dispatch.
pub type Handler = Arc<dyn Fn(RouteRequest) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(RouteRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiResult<Value>> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

/// Everything a handler sees of an inbound request.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub method: Method,
    pub path: String,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Bytes,
}

impl RouteRequest {
    /// Path parameter declared by the matched pattern.
    pub fn param(&self, name: &str) -> ApiResult<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ApiError::internal(format!("route has no parameter '{}'", name)))
    }

    /// Decode the JSON body.
    pub fn json<T: DeserializeOwned>(&self) -> ApiResult<T> {
        if self.body.is_empty() {
            return Err(ApiError::bad_request("request body is required"));
        }
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// One functional area's set of routes.
pub trait Registrar: Send + Sync {
    /// Functional area name, reported in conflicts and logs.
    fn name(&self) -> &'static str;

    /// Declare every route of this area.
    fn register(&self, routes: &mut RouteScope<'_>) -> Result<(), GatewayError>;
}

struct RouteEntry {
    method: Method,
    pattern: PathPattern,
    owner: &'static str,
    handler: Handler,
}

/// Routes in registration order.
#[derive(Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route owned by `owner`.
    pub fn add(
        &mut self,
        owner: &'static str,
        method: Method,
        pattern: &str,
        handler: Handler,
    ) -> Result<(), GatewayError> {
        let pattern = PathPattern::parse(pattern)?;

        // Overlaps at equal specificity would leave dispatch to registration order.
        let clash = self.entries.iter().find(|e| {
            e.method == method
                && e.pattern.specificity() == pattern.specificity()
                && e.pattern.overlaps(&pattern)
        });
        if let Some(existing) = clash {
            return Err(GatewayError::RouteConflict {
                method: method.to_string(),
                path: pattern.to_string(),
                existing: existing.owner.to_string(),
                incoming: owner.to_string(),
            });
        }

        tracing::debug!(registrar = owner, %method, route = %pattern, "route registered");
        self.entries.push(RouteEntry {
            method,
            pattern,
            owner,
            handler,
        });
        Ok(())
    }

    /// Most specific entry matching the request, with its path parameters.
    fn lookup(&self, method: &Method, path: &str) -> Option<(&RouteEntry, HashMap<String, String>)> {
        let mut best: Option<(&RouteEntry, HashMap<String, String>)> = None;
        for entry in self.entries.iter().filter(|e| &e.method == method) {
            if let Some(params) = entry.pattern.matches(path) {
                let better = best
                    .as_ref()
                    .map_or(true, |(b, _)| entry.pattern.specificity() > b.pattern.specificity());
                if better {
                    best = Some((entry, params));
                }
            }
        }
        best
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A [`RouteTable`] view that stamps every route with its registrar's name.
pub struct RouteScope<'a> {
    table: &'a mut RouteTable,
    owner: &'static str,
}

impl RouteScope<'_> {
    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Handler,
    ) -> Result<&mut Self, GatewayError> {
        self.table.add(self.owner, method, pattern, handler)?;
        Ok(self)
    }
}

/// Descriptor of a registered route, for introspection.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RouteInfo {
    pub method: String,
    pub path: String,
    pub registrar: &'static str,
}

/// Single dispatch entry point for request/response traffic.
#[derive(Default)]
pub struct Router {
    table: RouteTable,
    registrars: Vec<&'static str>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `registrar` declare its routes. Any conflict aborts composition.
    pub fn register(&mut self, registrar: &dyn Registrar) -> Result<(), GatewayError> {
        let name = registrar.name();
        let before = self.table.len();
        let mut scope = RouteScope {
            table: &mut self.table,
            owner: name,
        };
        registrar.register(&mut scope)?;
        self.registrars.push(name);
        tracing::info!(
            registrar = name,
            routes = self.table.len() - before,
            "registrar composed"
        );
        Ok(())
    }

    /// Register every registrar in order, stopping at the first error.
    pub fn compose<'a, I>(registrars: I) -> Result<Self, GatewayError>
    where
        I: IntoIterator<Item = &'a dyn Registrar>,
    {
        let mut router = Self::new();
        for registrar in registrars {
            router.register(registrar)?;
        }
        Ok(router)
    }

    /// Route a request to its handler and return the handler's result verbatim.
    pub async fn dispatch(
        &self,
        method: &Method,
        path: &str,
        query: HashMap<String, String>,
        body: Bytes,
    ) -> ApiResult<Value> {
        let Some((entry, params)) = self.table.lookup(method, path) else {
            return Err(ApiError::route_not_found(method.as_str(), path));
        };

        let request = RouteRequest {
            method: method.clone(),
            path: path.to_string(),
            params,
            query,
            body,
        };
        (entry.handler)(request).await
    }

    /// Registrar names in composition order.
    pub fn registrars(&self) -> &[&'static str] {
        &self.registrars
    }

    pub fn routes(&self) -> Vec<RouteInfo> {
        self.table
            .entries
            .iter()
            .map(|e| RouteInfo {
                method: e.method.to_string(),
                path: e.pattern.to_string(),
                registrar: e.owner,
            })
            .collect()
    }
}
