//! Structured logging for Arbiter.
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and either
//! JSON output (production) or pretty output (development).
//!
//! Three tracing targets carry the log streams an operator usually routes
//! separately:
//!
//! | Target | Content |
//! |--------|---------|
//! | `arbiter::audit` | one line per completed authorization request |
//! | `arbiter::policy` | policy document loads and refresh failures |
//! | `arbiter::protocol` | codec-level message tracing |
//!
//! # Example
//!
//! ```rust,ignore
//! use arbiter_telemetry::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::production())?;
//! tracing::info!(target: "arbiter::policy", policy_id = "alpha", "policy loaded");
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Filter directive (e.g. `"info"`, `"arbiter=debug,hyper=warn"`).
    pub level: String,

    /// Whether to output JSON.
    pub json_format: bool,

    /// Whether to include span open/close events.
    pub span_events: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include the target (module path or named stream).
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Human-readable output with debug level.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            json_format: false,
            span_events: true,
            file_line_info: true,
            include_target: true,
        }
    }

    /// JSON output at info level.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            span_events: false,
            file_line_info: false,
            include_target: true,
        }
    }

    /// Sets the filter directive.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

/// Initializes the logging subsystem.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the filter is invalid or a global
/// subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    }

    Ok(())
}

/// Creates an env filter from a directive string.
///
/// # Errors
///
/// Returns error if the directive is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))
}

/// Named tracing targets.
pub mod targets {
    /// One line per completed authorization request.
    pub const AUDIT: &str = "arbiter::audit";

    /// Policy loading and refresh.
    pub const POLICY: &str = "arbiter::policy";

    /// Message codec tracing.
    pub const PROTOCOL: &str = "arbiter::protocol";
}

/// Standard structured field names.
pub mod fields {
    /// Request ID.
    pub const REQUEST_ID: &str = "request_id";

    /// Policy set ID.
    pub const POLICY_ID: &str = "policy_id";

    /// Policy version.
    pub const POLICY_VERSION: &str = "policy_version";

    /// Policy information point ID.
    pub const PIP_ID: &str = "pip_id";

    /// Obligation ID.
    pub const OBLIGATION_ID: &str = "obligation_id";

    /// Authorization decision.
    pub const DECISION: &str = "decision";

    /// Error message.
    pub const ERROR: &str = "error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_production() {
        assert_eq!(LogConfig::default(), LogConfig::production());
        assert!(LogConfig::default().json_format);
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert!(!config.json_format);
        assert_eq!(config.level, "debug");
        assert!(config.file_line_info);
    }

    #[test]
    fn test_with_level() {
        let config = LogConfig::production().with_level("arbiter=trace");
        assert_eq!(config.level, "arbiter=trace");
    }

    #[test]
    fn test_create_env_filter() {
        assert!(create_env_filter("info").is_ok());
        assert!(create_env_filter("arbiter::audit=info,hyper=warn").is_ok());
    }

    #[test]
    fn test_invalid_env_filter() {
        let err = create_env_filter("arbiter=loud").unwrap_err();
        assert!(matches!(err, TelemetryError::LoggingInit(_)));
    }

    #[test]
    fn test_disabled_logging_is_noop() {
        let config = LogConfig {
            enabled: false,
            ..LogConfig::production()
        };
        assert!(init_logging(&config).is_ok());
    }

    #[test]
    fn test_targets_are_namespaced() {
        for target in [targets::AUDIT, targets::POLICY, targets::PROTOCOL] {
            assert!(target.starts_with("arbiter::"));
        }
    }
}
