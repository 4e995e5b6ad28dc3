//! Prometheus metrics for Arbiter.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `arbiter_requests_total` | Counter | `decision` | Completed authorization requests |
//! | `arbiter_request_errors_total` | Counter | `kind` | Requests terminated by an error |
//! | `arbiter_request_duration_seconds` | Histogram | - | Pipeline latency |
//! | `arbiter_admission_rejections_total` | Counter | - | Requests refused as service-busy |
//! | `arbiter_policy_refresh_total` | Counter | `result` | Policy refresh attempts |
//! | `arbiter_obligations_applied_total` | Counter | `obligation_id` | Obligation handler invocations |
//!
//! Recording functions are safe to call before [`init_metrics`]; the `metrics`
//! facade discards observations until a recorder is installed.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const REQUESTS_TOTAL: &str = "arbiter_requests_total";
const REQUEST_ERRORS_TOTAL: &str = "arbiter_request_errors_total";
const REQUEST_DURATION_SECONDS: &str = "arbiter_request_duration_seconds";
const ADMISSION_REJECTIONS_TOTAL: &str = "arbiter_admission_rejections_total";
const POLICY_REFRESH_TOTAL: &str = "arbiter_policy_refresh_total";
const OBLIGATIONS_APPLIED_TOTAL: &str = "arbiter_obligations_applied_total";

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Dedicated scrape listener (e.g. `"0.0.0.0:9090"`).
    ///
    /// When absent the recorder is installed without a listener and the
    /// rendered text is served by the admin endpoint instead.
    pub addr: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: None,
        }
    }
}

/// Installs the Prometheus recorder.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparsable listen address
/// and `TelemetryError::MetricsInit` if a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new();

    let handle = match &config.addr {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))?;
            builder.with_http_listener(addr).install_recorder()
        }
        None => builder.install_recorder(),
    }
    .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(
        REQUESTS_TOTAL,
        "Total authorization requests completed, by decision"
    );
    describe_counter!(
        REQUEST_ERRORS_TOTAL,
        "Total authorization requests terminated by an error, by kind"
    );
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        "Authorization pipeline duration in seconds"
    );
    describe_counter!(
        ADMISSION_REJECTIONS_TOTAL,
        "Total requests rejected because the worker pool and queue were saturated"
    );
    describe_counter!(
        POLICY_REFRESH_TOTAL,
        "Total policy refresh attempts, by result"
    );
    describe_counter!(
        OBLIGATIONS_APPLIED_TOTAL,
        "Total obligation handler invocations, by obligation id"
    );
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Records a completed pipeline run.
///
/// * `decision` - The final decision (e.g. `"Permit"`, `"Indeterminate"`)
/// * `duration` - Time spent in the pipeline
pub fn record_decision(decision: &str, duration: Duration) {
    counter!(REQUESTS_TOTAL, "decision" => decision.to_string()).increment(1);
    histogram!(REQUEST_DURATION_SECONDS).record(duration.as_secs_f64());
}

/// Records a request terminated by an error.
///
/// * `kind` - Error kind (e.g. `"policy_unavailable"`, `"decode"`)
pub fn record_request_error(kind: &str) {
    counter!(REQUEST_ERRORS_TOTAL, "kind" => kind.to_string()).increment(1);
}

/// Records a request refused by admission control.
pub fn record_admission_rejection() {
    counter!(ADMISSION_REJECTIONS_TOTAL).increment(1);
}

/// Records a policy refresh attempt.
pub fn record_policy_refresh(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!(POLICY_REFRESH_TOTAL, "result" => result).increment(1);
}

/// Records one obligation handler invocation.
pub fn record_obligation_applied(obligation_id: &str) {
    counter!(OBLIGATIONS_APPLIED_TOTAL, "obligation_id" => obligation_id.to_string())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(config.addr.is_none());
    }

    #[test]
    fn test_record_functions_dont_panic() {
        record_decision("Permit", Duration::from_millis(3));
        record_request_error("policy_unavailable");
        record_admission_rejection();
        record_policy_refresh(true);
        record_policy_refresh(false);
        record_obligation_applied("log-it");
    }

    #[test]
    fn test_disabled_metrics_is_noop() {
        let config = MetricsConfig {
            enabled: false,
            addr: Some("not an address".to_string()),
        };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_invalid_address_rejected() {
        let config = MetricsConfig {
            enabled: true,
            addr: Some("not an address".to_string()),
        };
        let err = init_metrics(&config).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidAddress(_)));
    }
}
