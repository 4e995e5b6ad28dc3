//! Error types for the policy decision point.
//!
//! [`PdpError`] covers service lifecycle and wiring. The collaborator errors
//! ([`FetchError`], [`EngineError`], [`PipError`], [`ObligationError`]) are
//! what external components report back; the pipeline absorbs them into
//! Indeterminate outcomes and never returns them to a requester.

use std::time::Duration;

use thiserror::Error;

/// Result type for service operations.
pub type PdpResult<T> = Result<T, PdpError>;

/// Errors raised while building, starting or administering the service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PdpError {
    /// Policy source failure.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Obligation registry rejected a mutation.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Policy information point lifecycle failure.
    #[error(transparent)]
    Pip(#[from] PipError),

    /// Invalid configuration or missing component.
    #[error("configuration error: {0}")]
    Config(String),

    /// A component was started twice.
    #[error("{0} is already running")]
    AlreadyRunning(String),

    /// The service has not been started.
    #[error("{0} is not running")]
    NotRunning(String),
}

impl PdpError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check if retrying the operation may succeed.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Failure to obtain a policy document from a policy source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum FetchError {
    /// One endpoint failed.
    #[error("policy administration point {endpoint} failed: {message}")]
    Endpoint {
        /// Endpoint URL.
        endpoint: String,
        /// Failure description.
        message: String,
    },

    /// Every configured endpoint failed.
    #[error("no policy administration point could be reached: {}", .0.join("; "))]
    AllEndpointsFailed(Vec<String>),

    /// A reachable endpoint returned no policy set.
    #[error("policy administration point returned no policy for {0}")]
    NoPolicy(String),

    /// The returned document could not be parsed.
    #[error("unable to parse policy document: {0}")]
    Parse(String),

    /// The fetch did not finish in time.
    #[error("policy fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The source has nothing to offer.
    #[error("policy source unavailable: {0}")]
    Unavailable(String),
}

impl FetchError {
    /// Create an endpoint error.
    pub fn endpoint(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Endpoint {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Network-level failures are worth retrying; malformed documents are not.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Endpoint { .. } | Self::AllEndpointsFailed(_) | Self::Timeout(_) | Self::Unavailable(_)
        )
    }
}

/// The evaluation engine failed to produce a decision.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    /// Create an engine error.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A policy information point failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PipError {
    /// Attribute lookup failed.
    #[error("{0}")]
    Failed(String),

    /// The PIP tried to redefine an attribute already present on the request.
    #[error("attribute {attribute_id} is already present with data type {existing}, cannot add values of type {attempted}")]
    Conflict {
        /// Attribute identifier.
        attribute_id: String,
        /// Data type already on the request.
        existing: String,
        /// Data type the PIP tried to add.
        attempted: String,
    },

    /// The PIP did not answer in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl PipError {
    /// Create a generic PIP failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// An obligation handler failed to fulfil its obligation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("obligation {obligation_id} could not be fulfilled: {message}")]
pub struct ObligationError {
    /// Obligation identifier.
    pub obligation_id: String,
    /// Failure description.
    pub message: String,
}

impl ObligationError {
    /// Create an obligation error.
    pub fn new(obligation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            obligation_id: obligation_id.into(),
            message: message.into(),
        }
    }
}

/// Obligation registry mutation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RegistryError {
    /// A different handler instance already owns the obligation id.
    #[error("a different handler is already registered for obligation {obligation_id}")]
    DuplicateHandler {
        /// Obligation identifier.
        obligation_id: String,
    },
}

/// Admission control refused a request.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// Worker pool and queue are saturated.
    #[error("service busy: request queue is full")]
    Busy,

    /// The admission shell is not accepting requests.
    #[error("service is not accepting requests")]
    Closed,
}
