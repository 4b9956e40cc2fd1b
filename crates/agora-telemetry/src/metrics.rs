//! Prometheus metrics.
//!
//! [`init_metrics`] installs a global Prometheus recorder; the server exposes
//! [`render_metrics`] on its scrape endpoint.
//! The `record_*` functions are cheap no-ops until a recorder is installed,
//! so library code calls them unconditionally.

use crate::error::TelemetryError;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names.
pub mod names {
    /// Requests served, by route and status.
    pub const REQUESTS_TOTAL: &str = "agora_requests_total";
    /// Request latency, by route.
    pub const REQUEST_DURATION: &str = "agora_request_duration_seconds";
    /// Rate-limit decisions, by scope and outcome.
    pub const RATE_LIMIT_DECISIONS: &str = "agora_rate_limit_decisions_total";
    /// Rejected credentials, by reason.
    pub const AUTH_FAILURES: &str = "agora_auth_failures_total";
    /// Access decisions, by outcome.
    pub const ACCESS_DECISIONS: &str = "agora_access_decisions_total";
    /// Notification events handled, by outcome.
    pub const NOTIFICATIONS: &str = "agora_notifications_total";
}

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether to install the recorder.
    pub enabled: bool,
    /// Address the server binds its scrape endpoint to.
    pub addr: String,
    /// Latency histogram buckets, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "0.0.0.0:9090".to_string(),
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ],
        }
    }
}

/// Installs the Prometheus recorder.
///
/// # Errors
///
/// Fails if the address does not parse or a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), TelemetryError> {
    if !config.enabled {
        return Ok(());
    }

    config
        .addr
        .parse::<SocketAddr>()
        .map_err(|_| TelemetryError::InvalidAddress(config.addr.clone()))?;

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(names::REQUEST_DURATION.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();
    Ok(())
}

fn register_metric_descriptions() {
    describe_counter!(names::REQUESTS_TOTAL, "Requests served");
    describe_histogram!(names::REQUEST_DURATION, Unit::Seconds, "Request latency");
    describe_counter!(names::RATE_LIMIT_DECISIONS, "Rate-limit decisions");
    describe_counter!(names::AUTH_FAILURES, "Rejected credentials");
    describe_counter!(names::ACCESS_DECISIONS, "Access decisions");
    describe_counter!(names::NOTIFICATIONS, "Notification events handled");
}

/// Renders the current metrics in Prometheus text format.
///
/// Returns `None` if [`init_metrics`] has not run.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Records one served request.
pub fn record_request(route: &str, status: u16, duration: Duration) {
    counter!(
        names::REQUESTS_TOTAL,
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(names::REQUEST_DURATION, "route" => route.to_string())
        .record(duration.as_secs_f64());
}

/// Records a rate-limit decision. `outcome` is `allowed`, `denied`, or `error`.
pub fn record_rate_limit(scope: &'static str, outcome: &'static str) {
    counter!(names::RATE_LIMIT_DECISIONS, "scope" => scope, "outcome" => outcome).increment(1);
}

/// Records a rejected credential.
pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES, "reason" => reason).increment(1);
}

/// Records an access decision.
pub fn record_access_decision(decision: &'static str) {
    counter!(names::ACCESS_DECISIONS, "decision" => decision).increment(1);
}

/// Records `count` notification drafts with the same outcome.
pub fn record_notification(outcome: &'static str, count: u64) {
    counter!(names::NOTIFICATIONS, "outcome" => outcome).increment(count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_request("/v1/posts/:id", 200, Duration::from_millis(12));
        record_rate_limit("ip", "allowed");
        record_auth_failure("expired");
        record_access_decision("deny");
        record_notification("inserted", 2);
    }

    #[test]
    fn bad_address_is_rejected() {
        let config = MetricsConfig {
            addr: "not-an-address".to_string(),
            ..MetricsConfig::default()
        };
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::InvalidAddress(_))
        ));
    }

    #[test]
    fn disabled_metrics_is_a_noop() {
        let config = MetricsConfig {
            enabled: false,
            ..MetricsConfig::default()
        };
        assert!(init_metrics(&config).is_ok());
    }
}
