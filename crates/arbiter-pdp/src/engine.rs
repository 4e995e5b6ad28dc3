//! The evaluation engine seam.
//!
//! Policy language semantics (targets, rules, combining algorithms) live in
//! an external engine. The decision point only hands it the enriched request
//! together with the snapshot that was current when the request arrived.

use crate::error::EngineError;
use crate::outcome::EvaluationOutcome;
use crate::policy::PolicySnapshot;
use crate::request::AuthorizationRequest;

/// Evaluates a request against a policy snapshot.
///
/// Implementations must be pure with respect to the decision point: they may
/// not retain the request or the snapshot beyond the call. Any failure is
/// reported as an [`EngineError`]; the pipeline turns it into an
/// Indeterminate outcome.
///
/// The pipeline fills in [`EvaluationOutcome::resource_id`] from the request
/// when the engine leaves it empty.
pub trait EvaluationEngine: Send + Sync {
    /// Evaluates `request` under `policy`.
    fn evaluate(
        &self,
        request: &AuthorizationRequest,
        policy: &PolicySnapshot,
    ) -> Result<EvaluationOutcome, EngineError>;
}

impl<F> EvaluationEngine for F
where
    F: Fn(&AuthorizationRequest, &PolicySnapshot) -> Result<EvaluationOutcome, EngineError>
        + Send
        + Sync,
{
    fn evaluate(
        &self,
        request: &AuthorizationRequest,
        policy: &PolicySnapshot,
    ) -> Result<EvaluationOutcome, EngineError> {
        self(request, policy)
    }
}
