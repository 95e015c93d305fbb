//! # Prometheus Metrics
//!
//! Resolution and access-decision counters for the gateway, served in text
//! format on the metrics port. Everything lives in a dedicated registry
//! with the `certgate` prefix.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

use certgate_auth::Decision;

#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    /// Address resolutions attempted (login and sensitive re-checks).
    pub resolutions_total: IntCounter,
    /// Resolutions that ended in an error.
    pub resolution_failures_total: IntCounter,
    /// Session cookies issued or re-issued.
    pub sessions_issued_total: IntCounter,
    pub guard_allow_total: IntCounter,
    pub guard_redirect_total: IntCounter,
    pub guard_deny_total: IntCounter,
    pub guard_pending_total: IntCounter,
    /// Wall time of one resolution, store round-trips included.
    pub resolution_latency_seconds: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl GatewayMetrics {
    /// Create and register all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("certgate".into()), None)?;

        let resolution_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "resolution_latency_seconds",
                "Wallet address to identity resolution latency in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )?;
        registry.register(Box::new(resolution_latency_seconds.clone()))?;

        Ok(Self {
            resolutions_total: counter(
                &registry,
                "resolutions_total",
                "Total number of address resolutions attempted",
            )?,
            resolution_failures_total: counter(
                &registry,
                "resolution_failures_total",
                "Total number of address resolutions that failed",
            )?,
            sessions_issued_total: counter(
                &registry,
                "sessions_issued_total",
                "Total number of session cookies issued",
            )?,
            guard_allow_total: counter(&registry, "guard_allow_total", "Requests allowed")?,
            guard_redirect_total: counter(
                &registry,
                "guard_redirect_total",
                "Requests redirected by the access guard",
            )?,
            guard_deny_total: counter(
                &registry,
                "guard_deny_total",
                "Requests denied by the access guard",
            )?,
            guard_pending_total: counter(
                &registry,
                "guard_pending_total",
                "Requests deferred while a session was still resolving",
            )?,
            resolution_latency_seconds,
            registry,
        })
    }

    /// Bump the counter matching an access decision.
    pub fn observe_decision(&self, decision: &Decision) {
        match decision {
            Decision::Allow => self.guard_allow_total.inc(),
            Decision::Pending => self.guard_pending_total.inc(),
            Decision::Redirect(_) => self.guard_redirect_total.inc(),
            Decision::Deny(_) => self.guard_deny_total.inc(),
        }
    }

    /// Encode all registered metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<GatewayMetrics>;

/// Renders `/metrics`. Returns 500 if encoding fails.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
