//! HTTP middleware for the gateway.
//!
//! Layer order (outermost first): Tracing → Timeout → body limit → handler.

pub mod metrics;
pub mod timeout;
pub mod tracing;

pub use metrics::{GatewayMetrics, RequestTimer};
pub use timeout::TimeoutLayer;
pub use tracing::{TracingLayer, REQUEST_ID_HEADER};
