//! # Arbiter
//!
//! **Policy decision point for grid authorization**
//!
//! Arbiter answers authorization requests from policy enforcement points
//! against a policy set it loads from remote policy administration points:
//!
//! - **Hot policy reloads**: the policy is refreshed on a timer and on admin
//!   request; a failed refresh keeps serving the previous policy
//! - **Safe failure**: every failure in the pipeline, including a failed
//!   obligation handler, answers Indeterminate, never Permit
//! - **Ordered obligations**: post-decision handlers run in precedence order
//! - **Bounded admission**: overload is answered service-busy instead of
//!   queueing without limit
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use arbiter::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new()
//!         .with_optional_file("arbiter.toml")?
//!         .with_env_prefix("ARBITER")
//!         .load()?;
//!
//!     Bootstrap::new(config)
//!         .engine(Arc::new(my_engine))
//!         .run(ShutdownSignal::with_os_signals())
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Crates
//!
//! | Module | Crate | Contents |
//! |--------|-------|----------|
//! | [`pdp`] | `arbiter-pdp` | Policy cache, pipeline, obligations, admission |
//! | [`config`] | `arbiter-config` | Layered TOML/JSON/environment configuration |
//! | [`telemetry`] | `arbiter-telemetry` | Logging and Prometheus metrics |
//! | [`server`] | `arbiter-server` | HTTP listeners and wire codec |

#![doc(html_root_url = "https://docs.rs/arbiter/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod bootstrap;

pub use bootstrap::{Bootstrap, BootstrapError};

// Re-export the decision point core
pub use arbiter_pdp as pdp;

// Re-export configuration
pub use arbiter_config as config;

// Re-export telemetry
pub use arbiter_telemetry as telemetry;

// Re-export the HTTP embedding
pub use arbiter_server as server;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use arbiter::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::bootstrap::{Bootstrap, BootstrapError};

    pub use arbiter_pdp::{
        Attribute, AttributeSet, AuthorizationRequest, Decision, EngineError, EnrichmentContext,
        EvaluationEngine, EvaluationOutcome, FinalResult, FnObligationHandler, FnPip, FulfillOn,
        Obligation, ObligationError, ObligationHandler, ObligationRegistry, Pdp, PdpConfig,
        PdpError, PdpResult, PipError, PolicyInformationPoint, PolicySnapshot, PolicySource,
        StaticPolicySource,
    };

    pub use arbiter_config::{ArbiterConfig, ConfigError, ConfigLoader};

    pub use arbiter_server::{JsonCodec, MessageCodec, Server, ServerConfig, ShutdownSignal};
}
