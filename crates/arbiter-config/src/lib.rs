//! Typed configuration for the Arbiter policy decision point.
//!
//! - TOML and JSON configuration files
//! - `ARBITER__SECTION__KEY` environment overrides
//! - strict parsing that fails on unknown fields
//! - conversion into the component configurations of `arbiter-pdp` and
//!   `arbiter-telemetry`
//!
//! # Configuration File Format
//!
//! ```toml
//! [service]
//! entity_id = "https://pdp.example.org"
//! http_addr = "0.0.0.0:8152"
//! admin_addr = "127.0.0.1:8153"
//!
//! [policy]
//! policy_set_id = "grid-policy"
//! paps = ["https://pap-a.example.org/query", "https://pap-b.example.org/query"]
//! retention_interval_mins = 240
//!
//! [admission]
//! max_requests = 200
//! max_request_queue_size = 500
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::ArbiterConfig;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
