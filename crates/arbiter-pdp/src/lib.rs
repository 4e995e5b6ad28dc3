//! Arbiter PDP - policy decision point core
//!
//! This crate answers authorization requests against a policy document that
//! is loaded from a remote policy administration point and kept fresh in the
//! background.
//!
//! # Overview
//!
//! - [`PolicyCache`] holds the current [`PolicySnapshot`] and refreshes it on
//!   a timer; a failed refresh keeps serving the previous snapshot
//! - [`ObligationRegistry`] holds post-decision handlers in a fixed order
//! - [`RequestPipeline`] resolves the policy, runs the PIPs, calls the
//!   evaluation engine and applies obligations; every failure becomes an
//!   Indeterminate result
//! - [`AdmissionShell`] bounds concurrency and rejects overload as busy
//! - [`Pdp`] wires these together and exposes the admin operations
//!
//! # Architecture
//!
//! ```text
//!                      ┌────────────────────────────┐
//!                      │ Policy Administration Point│
//!                      └──────────┬─────────────────┘
//!                                 │ fetch (timer / reload)
//!                      ┌──────────▼─────────────────┐
//!                      │   PolicyCache              │
//!                      │   (current snapshot)       │
//!                      └──────────┬─────────────────┘
//!                                 │ resolve
//!   request   ┌───────────┐  ┌────▼──────────────┐   ┌─────────────────────┐
//!   ─────────▶│ Admission │─▶│ RequestPipeline   │──▶│ ObligationRegistry  │
//!             │ Shell     │  │ PIPs → engine     │   │ (ordered handlers)  │
//!             └───────────┘  └────┬──────────────┘   └─────────────────────┘
//!                                 ▼
//!                           FinalResult + audit line
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use arbiter_pdp::{AuthorizationRequest, Pdp, PdpConfig, PapClient};
//!
//! let source = PapClient::new("grid-policy", vec!["https://pap.example.org/query".into()], timeout)?;
//! let pdp = Pdp::builder()
//!     .config(PdpConfig::production())
//!     .source(Arc::new(source))
//!     .engine(Arc::new(my_engine))
//!     .build()?;
//! pdp.start().await?;
//!
//! let result = pdp.authorize(request).await?;
//! println!("{}", result.decision());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admission;
pub mod audit;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod obligation;
pub mod outcome;
pub mod pip;
pub mod pipeline;
pub mod policy;
pub mod request;
pub mod service;
pub mod source;
pub mod status;

pub use admission::AdmissionShell;
pub use audit::AuditRecord;
pub use cache::{PolicyCache, RefreshOutcome};
pub use config::{AdmissionConfig, CacheConfig, PdpConfig};
pub use engine::EvaluationEngine;
pub use error::{
    AdmissionError, EngineError, FetchError, ObligationError, PdpError, PdpResult, PipError,
    RegistryError,
};
pub use obligation::{FnObligationHandler, ObligationHandler, ObligationRegistry};
pub use outcome::{Decision, EvaluationOutcome, FulfillOn, Obligation, Status, StatusCode};
pub use pip::{EnrichmentContext, FnPip, PolicyInformationPoint};
pub use pipeline::{FinalResult, PipelineStage, RequestPipeline, StageFailure};
pub use policy::{PolicyDocument, PolicyRef, PolicySnapshot};
pub use request::{Attribute, AttributeSet, AuthorizationRequest, RequestBuilder};
pub use service::{Pdp, PdpBuilder};
pub use source::{PapClient, PolicySource, StaticPolicySource};
pub use status::{PolicyInfo, ServiceStatus, StatusReport};
