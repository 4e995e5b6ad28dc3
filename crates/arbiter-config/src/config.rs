//! Root configuration type, validation and conversion into component configs.

use std::net::SocketAddr;
use std::time::Duration;

use arbiter_pdp::{AdmissionConfig, CacheConfig, PapClient, PdpConfig};
use arbiter_telemetry::{LogConfig, MetricsConfig, TelemetryConfig};
use serde::{Deserialize, Serialize};

use crate::{AdmissionSection, ConfigError, LogFormat, PolicyConfig, ServiceConfig, TelemetrySection};

/// Complete decision point configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use arbiter_config::ArbiterConfig;
///
/// let config = ArbiterConfig::default();
/// assert_eq!(config.policy.retention_interval_mins, 240);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct ArbiterConfig {
    /// Service identity and listeners.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Policy administration points and reload schedule.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Worker pool and queue sizing.
    #[serde(default)]
    pub admission: AdmissionSection,

    /// Logging and metrics.
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

impl ArbiterConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an address that does not
    /// parse, a PAP endpoint that is not an http(s) URL, a zero retention
    /// interval, worker count or queue size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_addr("service.http_addr", &self.service.http_addr)?;
        validate_addr("service.admin_addr", &self.service.admin_addr)?;

        if self.policy.retention_interval_mins == 0 {
            return Err(ConfigError::invalid_value(
                "policy.retention_interval_mins",
                "must be at least 1",
            ));
        }
        for pap in &self.policy.paps {
            if !(pap.starts_with("http://") || pap.starts_with("https://")) {
                return Err(ConfigError::invalid_value(
                    "policy.paps",
                    format!("not an http(s) URL: {pap}"),
                ));
            }
        }

        if self.admission.max_requests == 0 {
            return Err(ConfigError::invalid_value(
                "admission.max_requests",
                "must be at least 1",
            ));
        }
        if !self.admission.unbounded_queue && self.admission.max_request_queue_size == 0 {
            return Err(ConfigError::invalid_value(
                "admission.max_request_queue_size",
                "must be at least 1; set admission.unbounded_queue for an unbounded queue",
            ));
        }

        if self.telemetry.metrics.enabled {
            if let Some(addr) = &self.telemetry.metrics.addr {
                validate_addr("telemetry.metrics.addr", addr)?;
            }
        }

        Ok(())
    }

    /// Development preset: pretty debug logging, short reload interval and
    /// a small worker pool.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.service.http_addr = "127.0.0.1:8152".to_string();
        config.policy.retention_interval_mins = 1;
        config.admission.max_requests = 8;
        config.admission.max_request_queue_size = 32;
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.include_location = true;
        config
    }

    /// Production preset: JSON info logging and default sizing.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config
    }

    /// Policy cache settings.
    pub fn cache_config(&self) -> CacheConfig {
        let fetch_timeout = match self.policy.fetch_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        CacheConfig {
            fetch_timeout,
            ..CacheConfig::default()
        }
        .with_retention_interval_mins(self.policy.retention_interval_mins)
        .with_startup_gate(
            self.policy.startup_retries,
            Duration::from_millis(self.policy.startup_backoff_ms),
        )
    }

    /// Admission settings.
    pub fn admission_config(&self) -> AdmissionConfig {
        let config = AdmissionConfig::new().with_max_requests(self.admission.max_requests);
        if self.admission.unbounded_queue {
            config.with_unbounded_queue()
        } else {
            config.with_queue_capacity(self.admission.max_request_queue_size)
        }
    }

    /// Decision point settings.
    pub fn pdp_config(&self) -> PdpConfig {
        let mut config = PdpConfig::new()
            .with_service_name(&self.service.service_name)
            .with_entity_id(&self.service.entity_id)
            .with_cache_config(self.cache_config())
            .with_admission_config(self.admission_config());
        config.pip_timeout = match self.service.pip_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        config
    }

    /// Telemetry settings.
    pub fn telemetry_config(&self) -> TelemetryConfig {
        let logging = &self.telemetry.logging;
        let log = LogConfig {
            enabled: logging.enabled,
            level: logging.level.clone(),
            json_format: logging.format == LogFormat::Json,
            file_line_info: logging.include_location,
            ..LogConfig::default()
        };
        let metrics = MetricsConfig {
            enabled: self.telemetry.metrics.enabled,
            addr: self.telemetry.metrics.addr.clone(),
        };
        TelemetryConfig::default().with_logging(log).with_metrics(metrics)
    }

    /// Builds the HTTP client for the configured policy administration points.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingField` when no policy set id or no
    /// endpoint is configured.
    pub fn pap_client(&self) -> Result<PapClient, ConfigError> {
        if self.policy.policy_set_id.is_empty() {
            return Err(ConfigError::missing_field("policy.policy_set_id"));
        }
        if self.policy.paps.is_empty() {
            return Err(ConfigError::missing_field("policy.paps"));
        }

        let timeout = match self.policy.fetch_timeout_ms {
            0 => Duration::from_millis(default_http_timeout_ms()),
            ms => Duration::from_millis(ms),
        };
        let client = PapClient::new(&self.policy.policy_set_id, self.policy.paps.clone(), timeout)?
            .with_entity_id(&self.service.entity_id);
        Ok(client)
    }

    /// Authorization endpoint address.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the address does not parse.
    pub fn http_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("service.http_addr", &self.service.http_addr)
    }

    /// Admin endpoint address.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the address does not parse.
    pub fn admin_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("service.admin_addr", &self.service.admin_addr)
    }
}

const fn default_http_timeout_ms() -> u64 {
    30_000
}

fn parse_addr(field: &str, addr: &str) -> Result<SocketAddr, ConfigError> {
    addr.parse()
        .map_err(|_| ConfigError::invalid_value(field, format!("invalid socket address: {addr}")))
}

fn validate_addr(field: &str, addr: &str) -> Result<(), ConfigError> {
    parse_addr(field, addr).map(|_| ())
}
