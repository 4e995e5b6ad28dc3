//! # Arbiter Telemetry
//!
//! Logging and metrics for the Arbiter policy decision point.
//!
//! - **Logging**: `tracing-subscriber` with JSON or pretty output and the
//!   `arbiter::audit`, `arbiter::policy`, `arbiter::protocol` targets
//! - **Metrics**: Prometheus recorder plus the recording functions used by
//!   the decision pipeline
//!
//! ## Example
//!
//! ```rust,ignore
//! use arbiter_telemetry::{init_telemetry, TelemetryConfig};
//!
//! init_telemetry(&TelemetryConfig::production())?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Installs logging and metrics.
///
/// # Errors
///
/// Returns an error if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    logging::init_logging(&config.logging)?;
    metrics::init_metrics(&config.metrics)?;
    Ok(())
}
