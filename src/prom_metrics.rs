//! # Prometheus Metrics — Exposition for Scrapers
//!
//! Operational metrics in the Prometheus text exposition format, rendered on
//! each `GET /metrics` scrape.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `streamprize_rewards_achieved_total` | Counter | — | Targets that produced a winner |
//! | `streamprize_rewards_skipped_total` | Counter | — | Targets skipped for lack of participants |
//! | `streamprize_metric_fetch_failures_total` | Counter | — | Failed metric polls |
//! | `streamprize_current_metric` | Gauge | — | Last known engagement counter |
//! | `streamprize_participants` | Gauge | — | Registered participants |
//! | `streamprize_viewers_connected` | Gauge | — | Open viewer WebSockets |
//! | `streamprize_http_request_duration_seconds` | Histogram | `method`, `path` | HTTP latency |

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Label set for HTTP request metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct HttpLabel {
    pub method: String,
    pub path: String,
}

type HistogramConstructor = fn() -> Histogram;

/// Thread-safe metrics registry shared by the engine and the HTTP layer.
pub struct Metrics {
    pub registry: Registry,
    pub rewards_achieved: Counter,
    pub rewards_skipped: Counter,
    pub metric_fetch_failures: Counter,
    pub current_metric: Gauge,
    pub participants: Gauge,
    pub viewers_connected: Gauge,
    pub http_request_duration: Family<HttpLabel, Histogram, HistogramConstructor>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let rewards_achieved = Counter::default();
        registry.register(
            "streamprize_rewards_achieved",
            "Reward targets that produced a winner",
            rewards_achieved.clone(),
        );

        let rewards_skipped = Counter::default();
        registry.register(
            "streamprize_rewards_skipped",
            "Reward targets skipped because nobody was eligible",
            rewards_skipped.clone(),
        );

        let metric_fetch_failures = Counter::default();
        registry.register(
            "streamprize_metric_fetch_failures",
            "Metric polls that returned no value",
            metric_fetch_failures.clone(),
        );

        let current_metric = Gauge::default();
        registry.register(
            "streamprize_current_metric",
            "Last known value of the monitored engagement counter",
            current_metric.clone(),
        );

        let participants = Gauge::default();
        registry.register(
            "streamprize_participants",
            "Number of registered chat participants",
            participants.clone(),
        );

        let viewers_connected = Gauge::default();
        registry.register(
            "streamprize_viewers_connected",
            "Number of open viewer WebSocket connections",
            viewers_connected.clone(),
        );

        let http_request_duration =
            Family::<HttpLabel, Histogram, HistogramConstructor>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.005, 2.0, 12))
            });
        registry.register(
            "streamprize_http_request_duration_seconds",
            "HTTP request latency",
            http_request_duration.clone(),
        );

        Self {
            registry,
            rewards_achieved,
            rewards_skipped,
            metric_fetch_failures,
            current_metric,
            participants,
            viewers_connected,
            http_request_duration,
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        if let Err(e) = encode(&mut buf, &self.registry) {
            tracing::error!(error = %e, "failed to encode metrics");
        }
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_contains_registered_metrics() {
        let m = Metrics::new();
        m.rewards_achieved.inc();
        m.current_metric.set(250);
        let output = m.encode();
        assert!(output.contains("streamprize_rewards_achieved"));
        assert!(output.contains("streamprize_current_metric 250"));
        assert!(output.contains("streamprize_viewers_connected"));
    }

    #[test]
    fn http_histogram_records_per_label() {
        let m = Metrics::new();
        m.http_request_duration
            .get_or_create(&HttpLabel {
                method: "GET".into(),
                path: "/api/state".into(),
            })
            .observe(0.01);
        let output = m.encode();
        assert!(output.contains("/api/state"));
    }
}
