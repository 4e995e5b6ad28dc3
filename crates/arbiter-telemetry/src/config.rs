//! Telemetry configuration.

use serde::{Deserialize, Serialize};

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;

/// Configuration for all telemetry subsystems.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Logging configuration.
    pub logging: LogConfig,

    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl TelemetryConfig {
    /// Pretty debug logging, metrics without a dedicated listener.
    #[must_use]
    pub fn development() -> Self {
        Self {
            logging: LogConfig::development(),
            metrics: MetricsConfig::default(),
        }
    }

    /// JSON logging, metrics without a dedicated listener.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn with_logging(mut self, config: LogConfig) -> Self {
        self.logging = config;
        self
    }

    /// Sets the metrics configuration.
    #[must_use]
    pub fn with_metrics(mut self, config: MetricsConfig) -> Self {
        self.metrics = config;
        self
    }

    /// Exposes metrics on a dedicated scrape listener.
    #[must_use]
    pub fn with_metrics_addr(mut self, addr: impl Into<String>) -> Self {
        self.metrics.enabled = true;
        self.metrics.addr = Some(addr.into());
        self
    }
}
