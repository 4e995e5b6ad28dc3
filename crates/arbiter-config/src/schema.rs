//! Configuration schema types.
//!
//! Every section rejects unknown fields, so a misspelt key fails loading
//! instead of silently falling back to a default.

use serde::{Deserialize, Serialize};

/// Service identity and listener settings.
///
/// # Example
///
/// ```
/// use arbiter_config::ServiceConfig;
///
/// let config = ServiceConfig::default();
/// assert_eq!(config.http_addr, "0.0.0.0:8152");
/// assert_eq!(config.admin_addr, "127.0.0.1:8153");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Name reported by the status operation.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Entity id this decision point identifies itself with.
    #[serde(default = "default_entity_id")]
    pub entity_id: String,

    /// Authorization endpoint bind address.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Admin endpoint bind address.
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,

    /// Graceful shutdown drain bound in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Upper bound on each policy information point call, in milliseconds.
    /// Zero disables the bound.
    #[serde(default = "default_pip_timeout")]
    pub pip_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            entity_id: default_entity_id(),
            http_addr: default_http_addr(),
            admin_addr: default_admin_addr(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            request_timeout_ms: default_request_timeout(),
            pip_timeout_ms: default_pip_timeout(),
        }
    }
}

fn default_service_name() -> String {
    "arbiter".to_string()
}

fn default_entity_id() -> String {
    "arbiter".to_string()
}

fn default_http_addr() -> String {
    "0.0.0.0:8152".to_string()
}

fn default_admin_addr() -> String {
    "127.0.0.1:8153".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_pip_timeout() -> u64 {
    5_000
}

/// Where policies come from and how often they are reloaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Policy set requested from the policy administration points.
    #[serde(default)]
    pub policy_set_id: String,

    /// Policy administration point endpoints, tried in order.
    #[serde(default)]
    pub paps: Vec<String>,

    /// Minutes between background reloads.
    #[serde(default = "default_retention_interval")]
    pub retention_interval_mins: u64,

    /// Upper bound on one fetch in milliseconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,

    /// Forced reloads at startup before serving without a policy.
    #[serde(default = "default_startup_retries")]
    pub startup_retries: u32,

    /// Pause between startup reloads in milliseconds.
    #[serde(default = "default_startup_backoff")]
    pub startup_backoff_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            policy_set_id: String::new(),
            paps: Vec::new(),
            retention_interval_mins: default_retention_interval(),
            fetch_timeout_ms: default_fetch_timeout(),
            startup_retries: default_startup_retries(),
            startup_backoff_ms: default_startup_backoff(),
        }
    }
}

fn default_retention_interval() -> u64 {
    240
}

fn default_fetch_timeout() -> u64 {
    30_000
}

fn default_startup_retries() -> u32 {
    5
}

fn default_startup_backoff() -> u64 {
    500
}

/// Worker pool and request queue sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AdmissionSection {
    /// Requests evaluated concurrently.
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    /// Requests allowed to wait for a worker.
    #[serde(default = "default_max_request_queue_size")]
    pub max_request_queue_size: usize,

    /// Queue without bound, ignoring `max_request_queue_size`.
    ///
    /// Overload is then never rejected; use with care.
    #[serde(default)]
    pub unbounded_queue: bool,
}

impl Default for AdmissionSection {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            max_request_queue_size: default_max_request_queue_size(),
            unbounded_queue: false,
        }
    }
}

fn default_max_requests() -> usize {
    200
}

fn default_max_request_queue_size() -> usize {
    500
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directive, e.g. `info` or `arbiter::audit=info,warn`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    /// Enable metrics collection.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Dedicated Prometheus scrape address. Without one, metrics are served
    /// on the admin listener.
    #[serde(default)]
    pub addr: Option<String>,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: None,
        }
    }
}

/// Telemetry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySection {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsSection,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.entity_id, "arbiter");
        assert_eq!(config.shutdown_timeout_secs, 30);
        assert_eq!(config.pip_timeout_ms, 5_000);
    }

    #[test]
    fn test_policy_defaults() {
        let config = PolicyConfig::default();
        assert_eq!(config.retention_interval_mins, 240);
        assert_eq!(config.startup_retries, 5);
        assert_eq!(config.startup_backoff_ms, 500);
        assert!(config.paps.is_empty());
    }

    #[test]
    fn test_admission_defaults() {
        let config = AdmissionSection::default();
        assert_eq!(config.max_requests, 200);
        assert_eq!(config.max_request_queue_size, 500);
        assert!(!config.unbounded_queue);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<PolicyConfig, _> = toml::from_str("retention_interval = 10");
        assert!(result.is_err());
    }

    #[test]
    fn test_log_format_serde() {
        let json = serde_json::to_string(&LogFormat::Pretty).unwrap();
        assert_eq!(json, "\"pretty\"");
        let parsed: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(parsed, LogFormat::Json);
    }
}
