//! # Arbiter Server
//!
//! HTTP embedding for the Arbiter policy decision point.
//!
//! Two hyper listeners share one [`arbiter_pdp::Pdp`]:
//!
//! | Listener | Method | Path | Answer |
//! |----------|--------|------|--------|
//! | authz | `POST` | `/authz` | Encoded decision; decode errors get HTTP 500 and a codec fault; saturation gets HTTP 503 |
//! | authz | `GET` | `/status` | Plain-text status |
//! | admin | `GET` | `/status` | Plain-text status |
//! | admin | `GET`, `POST` | `/reloadPolicy` | 200 on success, 503 with the reason on failure |
//! | admin | `GET` | `/health` | JSON health |
//! | admin | `GET` | `/metrics` | Prometheus text, when metrics are enabled |
//!
//! Both listeners stop on the same [`ShutdownSignal`] and drain their
//! connections up to the configured timeout before the decision point is
//! shut down.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use arbiter_server::{Server, ServerConfig, ShutdownSignal};
//!
//! let pdp = Arc::new(pdp);
//! Server::new(pdp, ServerConfig::default())
//!     .run(ShutdownSignal::with_os_signals())
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod codec;
pub mod config;
pub mod error;
pub mod listener;
pub mod server;
pub mod shutdown;

pub use admin::AdminEndpoint;
pub use codec::{DecodeError, EncodeError, JsonCodec, MessageCodec};
pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{ServerError, ServerResult};
pub use listener::{Endpoint, HttpResponse};
pub use server::{AuthzEndpoint, BoundServer, Server};
pub use shutdown::{ConnectionGuard, ConnectionTracker, ShutdownSignal};
