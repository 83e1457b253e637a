//! Gateway error types.
//!
//! Two families live here:
//! - [`ApiError`]: the one structured error a handler may return. It carries
//!   an [`ErrorKind`] and a message and maps to an HTTP status.
//! - [`GatewayError`]: startup and process-level failures. Any of these
//!   aborts startup; none of them is ever sent to a client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric codes used in WebSocket `error` frames.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub const SUBSCRIPTION_ERROR: i32 = -32000;
    pub const NODE_ERROR: i32 = -32001;
    pub const LIMIT_EXCEEDED: i32 = -32005;
}

/// Client-visible error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No route matches the request.
    NotFound,
    /// Malformed input to a handler.
    BadRequest,
    /// Key manager or node client unreachable.
    CollaboratorUnavailable,
    /// A collaborator call exceeded its bound.
    GatewayTimeout,
    /// Malformed or rejected control message on an event connection.
    SubscriptionError,
    /// Resource already exists (key name taken).
    Conflict,
    /// Credentials rejected (wrong passphrase).
    Unauthorized,
    /// The node refused a transaction or query.
    Rejected,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::BadRequest | ErrorKind::SubscriptionError => StatusCode::BAD_REQUEST,
            ErrorKind::CollaboratorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Rejected => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::CollaboratorUnavailable => "collaborator_unavailable",
            ErrorKind::GatewayTimeout => "gateway_timeout",
            ErrorKind::SubscriptionError => "subscription_error",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured handler error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// No route for `method path`.
    pub fn route_not_found(method: &str, path: &str) -> Self {
        Self::new(
            ErrorKind::NotFound,
            format!("no route for {} {}", method, path),
        )
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, resource)
    }

    pub fn bad_request(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, details)
    }

    pub fn unavailable(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::CollaboratorUnavailable, details)
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::GatewayTimeout,
            format!("timed out waiting for {}", operation.into()),
        )
    }

    pub fn subscription(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::SubscriptionError, details)
    }

    pub fn conflict(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, details)
    }

    pub fn unauthorized(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, details)
    }

    pub fn rejected(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, details)
    }

    pub fn internal(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, details)
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// JSON body sent to HTTP clients.
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "kind": self.kind,
                "message": self.message,
            }
        })
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_body())).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::bad_request(format!("invalid JSON: {}", e))
    }
}

impl From<hex::FromHexError> for ApiError {
    fn from(e: hex::FromHexError) -> Self {
        ApiError::bad_request(format!("invalid hex: {}", e))
    }
}

/// Result type for handler operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Startup and process-level errors. Never sent to clients.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Two registrars claimed the same (method, path).
    #[error("route conflict: {method} {path} claimed by '{incoming}' is already owned by '{existing}'")]
    RouteConflict {
        method: String,
        path: String,
        existing: String,
        incoming: String,
    },

    /// A registrar declared a malformed path pattern.
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidRoute { pattern: String, reason: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    /// A collaborator could not be reached at boot.
    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}
