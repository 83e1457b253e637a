//! Gateway counters, exported as JSON and Prometheus text.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Ledger gateway metrics
#[derive(Default)]
pub struct GatewayMetrics {
    // Request counters
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_error: AtomicU64,
    pub requests_timeout: AtomicU64,

    // WebSocket gauges and counters
    pub websocket_connections: AtomicU64,
    pub websocket_subscriptions: AtomicU64,
    pub websocket_control_errors: AtomicU64,
    pub events_delivered: AtomicU64,
    pub slow_consumer_evictions: AtomicU64,

    // Upstream topic streams
    pub upstream_topics: AtomicU64,
    pub upstream_joins: AtomicU64,
    pub upstream_failures: AtomicU64,

    // Latency tracking (simplified - in production use histograms)
    pub total_latency_ms: AtomicU64,
    pub request_count_for_latency: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request
    pub fn record_request(&self, success: bool, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if success {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_error.fetch_add(1, Ordering::Relaxed);
        }

        self.total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.request_count_for_latency
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.requests_timeout.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ws_connect(&self) {
        self.websocket_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ws_disconnect(&self) {
        saturating_dec(&self.websocket_connections, 1);
    }

    pub fn record_ws_subscribe(&self) {
        self.websocket_subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `count` subscriptions released at once.
    pub fn record_ws_unsubscribe(&self, count: u64) {
        saturating_dec(&self.websocket_subscriptions, count);
    }

    pub fn record_control_error(&self) {
        self.websocket_control_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_events_delivered(&self, count: u64) {
        self.events_delivered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.slow_consumer_evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// A topic gained its first subscriber.
    pub fn record_topic_join(&self) {
        self.upstream_topics.fetch_add(1, Ordering::Relaxed);
    }

    /// A topic lost its last subscriber.
    pub fn record_topic_leave(&self) {
        saturating_dec(&self.upstream_topics, 1);
    }

    /// An upstream stream was (re-)established.
    pub fn record_upstream_join(&self) {
        self.upstream_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_failure(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.request_count_for_latency.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    /// Export metrics in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let counters: [(&str, &str, &str, u64); 12] = [
            ("lg_requests_total", "counter", "Total HTTP requests", self.requests_total.load(Ordering::Relaxed)),
            ("lg_requests_success_total", "counter", "Successful requests", self.requests_success.load(Ordering::Relaxed)),
            ("lg_requests_error_total", "counter", "Failed requests", self.requests_error.load(Ordering::Relaxed)),
            ("lg_requests_timeout_total", "counter", "Requests cut off by the request timeout", self.requests_timeout.load(Ordering::Relaxed)),
            ("lg_websocket_connections", "gauge", "Open event connections", self.websocket_connections.load(Ordering::Relaxed)),
            ("lg_websocket_subscriptions", "gauge", "Live subscriptions", self.websocket_subscriptions.load(Ordering::Relaxed)),
            ("lg_websocket_control_errors_total", "counter", "Rejected control messages", self.websocket_control_errors.load(Ordering::Relaxed)),
            ("lg_events_delivered_total", "counter", "Events queued to subscribers", self.events_delivered.load(Ordering::Relaxed)),
            ("lg_slow_consumer_evictions_total", "counter", "Connections evicted for a full outbox", self.slow_consumer_evictions.load(Ordering::Relaxed)),
            ("lg_upstream_topics", "gauge", "Topics with an upstream subscription", self.upstream_topics.load(Ordering::Relaxed)),
            ("lg_upstream_joins_total", "counter", "Upstream streams established", self.upstream_joins.load(Ordering::Relaxed)),
            ("lg_upstream_failures_total", "counter", "Upstream stream failures", self.upstream_failures.load(Ordering::Relaxed)),
        ];

        let mut output = String::new();
        for (name, kind, help, value) in counters {
            output.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n"
            ));
        }
        output.push_str(&format!(
            "# HELP lg_average_latency_ms Average request latency\n\
             # TYPE lg_average_latency_ms gauge\n\
             lg_average_latency_ms {:.2}\n",
            self.average_latency_ms()
        ));
        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "requests": {
                "total": self.requests_total.load(Ordering::Relaxed),
                "success": self.requests_success.load(Ordering::Relaxed),
                "error": self.requests_error.load(Ordering::Relaxed),
                "timeouts": self.requests_timeout.load(Ordering::Relaxed),
            },
            "websocket": {
                "connections": self.websocket_connections.load(Ordering::Relaxed),
                "subscriptions": self.websocket_subscriptions.load(Ordering::Relaxed),
                "control_errors": self.websocket_control_errors.load(Ordering::Relaxed),
                "events_delivered": self.events_delivered.load(Ordering::Relaxed),
                "slow_consumer_evictions": self.slow_consumer_evictions.load(Ordering::Relaxed),
            },
            "upstream": {
                "topics": self.upstream_topics.load(Ordering::Relaxed),
                "joins": self.upstream_joins.load(Ordering::Relaxed),
                "failures": self.upstream_failures.load(Ordering::Relaxed),
            },
            "latency": {
                "average_ms": self.average_latency_ms(),
            }
        })
    }
}

fn saturating_dec(counter: &AtomicU64, by: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(by))
    });
}

/// Request timing helper
pub struct RequestTimer {
    start: Instant,
    metrics: Arc<GatewayMetrics>,
}

impl RequestTimer {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    pub fn finish(self, success: bool) {
        let latency_ms = self.start.elapsed().as_millis() as u64;
        self.metrics.record_request(success, latency_ms);
    }
}
