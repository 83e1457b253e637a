//! Gateway service: composes registrars into one [`Router`] and serves it
//! next to the event surface on a single listening address.

use crate::domain::config::{GatewayConfig, WebSocketConfig};
use crate::domain::error::{ApiError, GatewayError};
use crate::middleware::{GatewayMetrics, TimeoutLayer, TracingLayer};
use crate::ports::{bounded, NodeClient};
use crate::router::{Registrar, Router};
use crate::ws::{SubscriptionManager, WebSocketHandler};
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, ws::WebSocketUpgrade, Query, State},
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, info};

/// Paths answered by the service itself. Registrars may not claim them.
pub const RESERVED_PATHS: [&str; 3] = ["/health", "/metrics", "/websocket"];

/// Name reported as the owner of the reserved paths in conflicts.
const SERVICE_OWNER: &str = "gateway";

/// The composed gateway.
#[derive(Clone)]
pub struct GatewayService {
    config: GatewayConfig,
    router: Arc<Router>,
    node: Arc<dyn NodeClient>,
    subscriptions: Arc<SubscriptionManager>,
    metrics: Arc<GatewayMetrics>,
}

impl GatewayService {
    /// Validate `config` and compose `registrars` in order.
    ///
    /// Any route conflict, including a registrar claiming one of
    /// [`RESERVED_PATHS`], aborts construction.
    pub fn new(
        config: GatewayConfig,
        node: Arc<dyn NodeClient>,
        registrars: Vec<Box<dyn Registrar>>,
    ) -> Result<Self, GatewayError> {
        config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let router = Router::compose(registrars.iter().map(|r| r.as_ref()))?;
        check_reserved(&router)?;
        info!(
            registrars = ?router.registrars(),
            routes = router.routes().len(),
            "router composed"
        );

        let metrics = Arc::new(GatewayMetrics::new());
        let subscriptions = SubscriptionManager::new(
            Arc::clone(&node),
            &config.websocket,
            config.upstream.clone(),
            Arc::clone(&metrics),
        );

        Ok(Self {
            config,
            router: Arc::new(router),
            node,
            subscriptions,
            metrics,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn subscriptions(&self) -> Arc<SubscriptionManager> {
        Arc::clone(&self.subscriptions)
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Build the HTTP application: service routes, the WebSocket upgrade and
    /// a fallback that dispatches everything else through the [`Router`].
    pub fn build_http_router(&self) -> axum::Router {
        let state = AppState {
            router: Arc::clone(&self.router),
            node: Arc::clone(&self.node),
            subscriptions: Arc::clone(&self.subscriptions),
            metrics: Arc::clone(&self.metrics),
            websocket: self.config.websocket.clone(),
            call_timeout: self.config.timeouts.call,
        };

        axum::Router::new()
            .route("/health", get(health_check))
            .route("/metrics", get(metrics_export))
            .route("/websocket", get(websocket_upgrade))
            .fallback(dispatch)
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(self.config.limits.max_body_size))
            .layer(TimeoutLayer::new(
                self.config.timeouts.request,
                Arc::clone(&self.metrics),
            ))
            .layer(TracingLayer::new(Arc::clone(&self.metrics)))
    }

    /// Serve on `listener` until `shutdown` resolves, then ask every event
    /// connection to close and drain in-flight requests.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener
            .local_addr()
            .map_err(|e| GatewayError::Bind(e.to_string()))?;
        info!(addr = %addr, "ledger gateway listening");

        let subscriptions = Arc::clone(&self.subscriptions);
        axum::serve(listener, self.build_http_router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("shutdown requested");
                subscriptions.close_all();
            })
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        info!("ledger gateway stopped");
        Ok(())
    }
}

fn check_reserved(router: &Router) -> Result<(), GatewayError> {
    for route in router.routes() {
        if route.method == Method::GET.as_str() && RESERVED_PATHS.contains(&route.path.as_str()) {
            return Err(GatewayError::RouteConflict {
                method: route.method,
                path: route.path,
                existing: SERVICE_OWNER.to_string(),
                incoming: route.registrar.to_string(),
            });
        }
    }
    Ok(())
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    router: Arc<Router>,
    node: Arc<dyn NodeClient>,
    subscriptions: Arc<SubscriptionManager>,
    metrics: Arc<GatewayMetrics>,
    websocket: WebSocketConfig,
    call_timeout: Duration,
}

async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
    body: Bytes,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(e) => return ApiError::bad_request(e.body_text()).into_response(),
    };

    match state.router.dispatch(&method, uri.path(), query, body).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => {
            debug!(method = %method, path = uri.path(), kind = e.kind.as_str(), error = %e.message, "request failed");
            e.into_response()
        }
    }
}

async fn health_check(State(state): State<AppState>) -> Response {
    let node = bounded(state.call_timeout, "node status", state.node.status()).await;
    let events = serde_json::json!({
        "connections": state.subscriptions.connection_count(),
        "topics": state.subscriptions.active_topics().len(),
    });

    match node {
        Ok(status) => Json(serde_json::json!({
            "status": "ok",
            "version": crate::VERSION,
            "node": status,
            "events": events,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "degraded",
                "version": crate::VERSION,
                "node": e.to_body(),
                "events": events,
            })),
        )
            .into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct MetricsQuery {
    format: Option<String>,
}

async fn metrics_export(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Response {
    match query.format.as_deref() {
        Some("prometheus") => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            state.metrics.to_prometheus(),
        )
            .into_response(),
        _ => Json(state.metrics.to_json()).into_response(),
    }
}

async fn websocket_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    // Frames above the configured size get an error reply from the handler;
    // the transport only drops frames far beyond it.
    let transport_limit = state.websocket.max_message_size.saturating_mul(4);
    let handler = WebSocketHandler::new(
        Arc::clone(&state.subscriptions),
        Arc::clone(&state.node),
        state.websocket.clone(),
        state.call_timeout,
    );
    ws.max_message_size(transport_limit)
        .on_upgrade(move |socket| handler.handle(socket))
}
