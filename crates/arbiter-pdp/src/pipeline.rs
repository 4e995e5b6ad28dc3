//! The request evaluation pipeline.
//!
//! ```text
//! RECEIVED → POLICY_RESOLVED → ENRICHED → EVALUATED → OBLIGATIONS_APPLIED → RESULT_READY
//!     └──────────────┴─────────────┴───────────┴─────────────┘
//!                   any failure: Indeterminate / processing-error
//! ```
//!
//! Every stage failure becomes a [`StageFailure`] and then an Indeterminate
//! outcome. [`RequestPipeline::evaluate`] always returns a [`FinalResult`],
//! writes one audit record and updates the status counters.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arbiter_telemetry::metrics;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::audit::AuditRecord;
use crate::cache::PolicyCache;
use crate::engine::EvaluationEngine;
use crate::error::{EngineError, PipError};
use crate::obligation::ObligationRegistry;
use crate::outcome::{Decision, EvaluationOutcome};
use crate::pip::{EnrichmentContext, PolicyInformationPoint};
use crate::policy::{PolicyRef, PolicySnapshot};
use crate::request::AuthorizationRequest;
use crate::status::ServiceStatus;

/// Pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    /// Request accepted.
    Received,
    /// Current policy resolved.
    PolicyResolved,
    /// PIPs have run.
    Enriched,
    /// Engine produced a decision.
    Evaluated,
    /// Obligation handlers have run.
    ObligationsApplied,
    /// Result assembled.
    ResultReady,
}

/// Why a request ended in a processing error.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageFailure {
    /// The cache held no policy.
    #[error("no policy is available by which to evaluate the request")]
    PolicyUnavailable,

    /// A PIP failed.
    #[error("policy information point {pip_id} failed: {reason}")]
    Enrichment {
        /// Failing PIP.
        pip_id: String,
        /// Failure description.
        reason: String,
    },

    /// The engine failed.
    #[error("error evaluating policy: {0}")]
    Evaluation(String),

    /// An obligation handler failed.
    #[error("obligation {obligation_id} could not be fulfilled: {reason}")]
    Obligation {
        /// Failing obligation.
        obligation_id: String,
        /// Failure description.
        reason: String,
    },
}

impl StageFailure {
    /// The stage that failed.
    pub const fn stage(&self) -> PipelineStage {
        match self {
            Self::PolicyUnavailable => PipelineStage::PolicyResolved,
            Self::Enrichment { .. } => PipelineStage::Enriched,
            Self::Evaluation(_) => PipelineStage::Evaluated,
            Self::Obligation { .. } => PipelineStage::ObligationsApplied,
        }
    }

    /// Metric label for the failure.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PolicyUnavailable => "policy_unavailable",
            Self::Enrichment { .. } => "enrichment",
            Self::Evaluation(_) => "evaluation",
            Self::Obligation { .. } => "obligation",
        }
    }
}

/// The fully processed answer to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalResult {
    /// Request identifier.
    pub request_id: String,
    /// Requester identity.
    pub requester_id: Option<String>,
    /// Fresh response identifier.
    pub response_id: String,
    /// Final outcome.
    pub outcome: EvaluationOutcome,
    /// Policy in effect, if one was resolved.
    pub policy: Option<PolicyRef>,
    /// Obligation handlers invoked, in order.
    pub applied_obligations: Vec<String>,
    /// `ResultReady` on success, otherwise the stage that failed.
    pub stage: PipelineStage,
    /// Failure detail when `stage` is not `ResultReady`.
    pub failure: Option<StageFailure>,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
}

impl FinalResult {
    /// The final decision.
    pub fn decision(&self) -> Decision {
        self.outcome.decision
    }

    /// Whether the request ended in a stage failure.
    pub fn is_error(&self) -> bool {
        self.failure.is_some()
    }
}

struct Evaluated {
    outcome: EvaluationOutcome,
    applied: Vec<String>,
}

struct Failed {
    failure: StageFailure,
    resource_id: Option<String>,
}

impl Failed {
    fn new(failure: StageFailure, resource_id: Option<String>) -> Self {
        Self {
            failure,
            resource_id,
        }
    }
}

/// Resolves policy, enriches, evaluates and applies obligations.
pub struct RequestPipeline {
    cache: Arc<PolicyCache>,
    engine: Arc<dyn EvaluationEngine>,
    registry: Arc<ObligationRegistry>,
    pips: Vec<Arc<dyn PolicyInformationPoint>>,
    status: Arc<ServiceStatus>,
    pip_timeout: Option<Duration>,
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pips: Vec<&str> = self.pips.iter().map(|pip| pip.id()).collect();
        f.debug_struct("RequestPipeline")
            .field("cache", &self.cache)
            .field("registry", &self.registry)
            .field("pips", &pips)
            .field("pip_timeout", &self.pip_timeout)
            .finish_non_exhaustive()
    }
}

impl RequestPipeline {
    /// Creates a pipeline with no PIPs and an empty registry.
    pub fn new(cache: Arc<PolicyCache>, engine: Arc<dyn EvaluationEngine>) -> Self {
        Self {
            cache,
            engine,
            registry: Arc::new(ObligationRegistry::new()),
            pips: Vec::new(),
            status: Arc::new(ServiceStatus::new("arbiter", env!("CARGO_PKG_VERSION"))),
            pip_timeout: None,
        }
    }

    /// Uses a shared obligation registry.
    pub fn with_registry(mut self, registry: Arc<ObligationRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Appends a PIP; PIPs run in the order added.
    pub fn with_pip(mut self, pip: Arc<dyn PolicyInformationPoint>) -> Self {
        self.pips.push(pip);
        self
    }

    /// Reports to a shared status.
    pub fn with_status(mut self, status: Arc<ServiceStatus>) -> Self {
        self.status = status;
        self
    }

    /// Bounds each PIP call.
    pub fn with_pip_timeout(mut self, timeout: Duration) -> Self {
        self.pip_timeout = Some(timeout);
        self
    }

    /// The policy cache.
    pub fn cache(&self) -> &Arc<PolicyCache> {
        &self.cache
    }

    /// The obligation registry.
    pub fn registry(&self) -> &Arc<ObligationRegistry> {
        &self.registry
    }

    /// The status counters.
    pub fn status(&self) -> &Arc<ServiceStatus> {
        &self.status
    }

    /// Registered PIPs, in order.
    pub fn pips(&self) -> &[Arc<dyn PolicyInformationPoint>] {
        &self.pips
    }

    /// Evaluates one request.
    #[instrument(skip_all, fields(request_id = %request.request_id))]
    pub async fn evaluate(&self, request: AuthorizationRequest) -> FinalResult {
        let started = Instant::now();
        let request_id = request.request_id.clone();
        let requester_id = request.issuer.clone();

        let policy = self.cache.current();
        let run = match &policy {
            Some(policy) => self.run(request, policy).await,
            None => Err(Failed::new(StageFailure::PolicyUnavailable, None)),
        };

        let (outcome, applied, stage, failure) = match run {
            Ok(Evaluated { outcome, applied }) => {
                (outcome, applied, PipelineStage::ResultReady, None)
            }
            Err(Failed {
                failure,
                resource_id,
            }) => {
                warn!(stage = ?failure.stage(), error = %failure, "request ended in processing error");
                metrics::record_request_error(failure.kind());
                (
                    EvaluationOutcome::processing_error(failure.to_string(), resource_id),
                    Vec::new(),
                    failure.stage(),
                    Some(failure),
                )
            }
        };

        let result = FinalResult {
            request_id,
            requester_id,
            response_id: Uuid::now_v7().to_string(),
            outcome,
            policy: policy.as_deref().map(PolicySnapshot::reference),
            applied_obligations: applied,
            stage,
            failure,
            completed_at: Utc::now(),
        };

        self.status.record_request(result.is_error());
        metrics::record_decision(result.decision().as_str(), started.elapsed());
        AuditRecord::from_result(&result).emit();

        debug!(
            decision = %result.decision(),
            duration_ms = started.elapsed().as_millis(),
            "request evaluated"
        );
        result
    }

    async fn run(
        &self,
        mut request: AuthorizationRequest,
        policy: &Arc<PolicySnapshot>,
    ) -> Result<Evaluated, Failed> {
        debug!(policy_id = policy.policy_set_id(), policy_version = policy.version(), "policy resolved");

        for pip in &self.pips {
            if let Err(e) = self.enrich(pip.as_ref(), &mut request).await {
                return Err(Failed::new(
                    StageFailure::Enrichment {
                        pip_id: pip.id().to_string(),
                        reason: e.to_string(),
                    },
                    request.resource_id().map(str::to_owned),
                ));
            }
        }

        let request = Arc::new(request);
        let resource_id = request.resource_id().map(str::to_owned);

        let mut outcome = match self.call_engine(&request, policy) {
            Ok(outcome) => outcome,
            Err(e) => {
                return Err(Failed::new(StageFailure::Evaluation(e.to_string()), resource_id));
            }
        };
        if outcome.resource_id.is_none() {
            outcome.resource_id = resource_id;
        }

        match self.registry.process(&request, &outcome) {
            Ok(applied) => Ok(Evaluated { outcome, applied }),
            Err(e) => Err(Failed::new(
                StageFailure::Obligation {
                    obligation_id: e.obligation_id,
                    reason: e.message,
                },
                outcome.resource_id,
            )),
        }
    }

    async fn enrich(
        &self,
        pip: &dyn PolicyInformationPoint,
        request: &mut AuthorizationRequest,
    ) -> Result<(), PipError> {
        let mut context = EnrichmentContext::new(request);
        let call = AssertUnwindSafe(pip.enrich(&mut context))
            .catch_unwind()
            .map(|finished| {
                finished.unwrap_or_else(|_| {
                    warn!(pip_id = pip.id(), "policy information point panicked");
                    Err(PipError::failed("policy information point panicked"))
                })
            });
        let result = match self.pip_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| Err(PipError::Timeout(limit))),
            None => call.await,
        };
        debug!(pip_id = pip.id(), added = context.added(), ok = result.is_ok(), "policy information point finished");
        result
    }

    fn call_engine(
        &self,
        request: &AuthorizationRequest,
        policy: &PolicySnapshot,
    ) -> Result<EvaluationOutcome, EngineError> {
        catch_unwind(AssertUnwindSafe(|| self.engine.evaluate(request, policy)))
            .unwrap_or_else(|_| Err(EngineError::new("evaluation engine panicked")))
    }
}
