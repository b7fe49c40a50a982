//! Prometheus metrics
//!
//! Exposed as OpenMetrics text at `GET /metrics`.

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Instant;

// ─── Label types ───

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub path: String,
    pub method: String,
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RouteLabels {
    pub path: String,
    pub method: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabels {
    pub reason: String,
}

// ─── Registry ───

/// Service metrics, registered under the `sentinel` prefix
///
/// Recording only needs `&self`; share through `Arc`.
pub struct SentinelMetrics {
    registry: Registry,
    pub http_requests: Family<RequestLabels, Counter>,
    pub http_duration: Family<RouteLabels, Histogram>,
    pub admission_rejections: Family<ReasonLabels, Counter>,
    pub alerts_ingested: Counter,
}

impl SentinelMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("sentinel");

        let http_requests = Family::<RequestLabels, Counter>::default();
        registry.register(
            "http_requests",
            "Total HTTP requests",
            http_requests.clone(),
        );

        let http_duration = Family::<RouteLabels, Histogram>::new_with_constructor(|| {
            // 5ms .. ~10s
            Histogram::new(exponential_buckets(0.005, 2.0, 12))
        });
        registry.register(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
            http_duration.clone(),
        );

        let admission_rejections = Family::<ReasonLabels, Counter>::default();
        registry.register(
            "admission_rejections",
            "Requests rejected by the admission chain",
            admission_rejections.clone(),
        );

        let alerts_ingested = Counter::default();
        registry.register(
            "alerts_ingested",
            "Alerts accepted and stored",
            alerts_ingested.clone(),
        );

        Self {
            registry,
            http_requests,
            http_duration,
            admission_rejections,
            alerts_ingested,
        }
    }

    pub fn record_request(&self, path: &str, method: &str, status: u16, seconds: f64) {
        self.http_requests
            .get_or_create(&RequestLabels {
                path: path.to_string(),
                method: method.to_string(),
                status: status.to_string(),
            })
            .inc();
        self.http_duration
            .get_or_create(&RouteLabels {
                path: path.to_string(),
                method: method.to_string(),
            })
            .observe(seconds);
    }

    pub fn record_rejection(&self, reason: &str) {
        self.admission_rejections
            .get_or_create(&ReasonLabels {
                reason: reason.to_string(),
            })
            .inc();
    }

    pub fn record_ingested(&self) {
        self.alerts_ingested.inc();
    }

    /// Encode all metrics as OpenMetrics text
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, &self.registry) {
            tracing::error!(error = %e, "Failed to encode metrics");
        }
        buffer
    }
}

impl Default for SentinelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Records count and latency per matched route
///
/// The route template is used as the label so path parameters such as
/// bot tokens never reach the metrics output.
pub async fn track_http(
    State(metrics): State<Arc<SentinelMetrics>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = req.method().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    metrics.record_request(
        &path,
        &method,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_encodes() {
        let metrics = SentinelMetrics::new();
        assert!(metrics.encode().contains("# EOF"));
    }

    #[test]
    fn test_request_metrics_names() {
        let metrics = SentinelMetrics::new();
        metrics.record_request("/webhook", "POST", 200, 0.01);

        let encoded = metrics.encode();
        assert!(encoded.contains("sentinel_http_requests_total"));
        assert!(encoded.contains("sentinel_http_request_duration_seconds"));
        assert!(encoded.contains("path=\"/webhook\""));
        assert!(encoded.contains("status=\"200\""));
    }

    #[test]
    fn test_rejection_counter() {
        let metrics = SentinelMetrics::new();
        metrics.record_rejection("rate_limited");
        metrics.record_rejection("rate_limited");
        metrics.record_rejection("duplicate");

        assert_eq!(
            metrics
                .admission_rejections
                .get_or_create(&ReasonLabels {
                    reason: "rate_limited".into()
                })
                .get(),
            2
        );
        assert!(metrics.encode().contains("reason=\"duplicate\""));
    }

    #[test]
    fn test_ingested_counter() {
        let metrics = SentinelMetrics::new();
        metrics.record_ingested();
        assert_eq!(metrics.alerts_ingested.get(), 1);
        assert!(metrics.encode().contains("sentinel_alerts_ingested_total 1"));
    }
}
