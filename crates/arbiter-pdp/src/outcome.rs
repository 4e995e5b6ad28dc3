//! Decisions, obligations and evaluation outcomes.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Authorization decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    /// Access is allowed.
    Permit,
    /// Access is denied.
    Deny,
    /// No policy applied to the request.
    NotApplicable,
    /// No decision could be reached.
    Indeterminate,
}

impl Decision {
    /// Decision name as used in logs and audit records.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Permit => "Permit",
            Self::Deny => "Deny",
            Self::NotApplicable => "NotApplicable",
            Self::Indeterminate => "Indeterminate",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decision effect an obligation is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FulfillOn {
    /// Applies to Permit decisions.
    Permit,
    /// Applies to Deny decisions.
    Deny,
}

impl FulfillOn {
    /// Whether an obligation with this effect applies to `decision`.
    ///
    /// NotApplicable and Indeterminate match neither effect.
    pub const fn matches(self, decision: Decision) -> bool {
        matches!(
            (self, decision),
            (Self::Permit, Decision::Permit) | (Self::Deny, Decision::Deny)
        )
    }
}

/// Outcome status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// Evaluation completed.
    Ok,
    /// Evaluation failed inside the decision point.
    ProcessingError,
    /// The request was malformed.
    SyntaxError,
}

impl StatusCode {
    /// Status URI.
    pub const fn as_urn(self) -> &'static str {
        match self {
            Self::Ok => "urn:oasis:names:tc:xacml:1.0:status:ok",
            Self::ProcessingError => "urn:oasis:names:tc:xacml:1.0:status:processing-error",
            Self::SyntaxError => "urn:oasis:names:tc:xacml:1.0:status:syntax-error",
        }
    }
}

/// Status of an evaluation outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Status code.
    pub code: StatusCode,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Status {
    /// Successful status.
    pub const fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            message: None,
        }
    }

    /// Processing-error status with a message.
    pub fn processing_error(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::ProcessingError,
            message: Some(message.into()),
        }
    }
}

/// An obligation returned by the evaluation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    /// Obligation identifier.
    pub obligation_id: String,
    /// Decision effect the obligation is attached to.
    pub fulfill_on: FulfillOn,
    /// Attribute assignments, by attribute id.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub assignments: IndexMap<String, String>,
}

impl Obligation {
    /// Creates an obligation without assignments.
    pub fn new(obligation_id: impl Into<String>, fulfill_on: FulfillOn) -> Self {
        Self {
            obligation_id: obligation_id.into(),
            fulfill_on,
            assignments: IndexMap::new(),
        }
    }

    /// Adds an attribute assignment.
    pub fn with_assignment(mut self, attribute_id: impl Into<String>, value: impl Into<String>) -> Self {
        self.assignments.insert(attribute_id.into(), value.into());
        self
    }
}

/// Result of applying the evaluation engine to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    /// The decision.
    pub decision: Decision,
    /// Outcome status.
    pub status: Status,
    /// Obligations returned with the decision, before filtering.
    #[serde(default)]
    pub obligations: Vec<Obligation>,
    /// Resource id of the request, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl EvaluationOutcome {
    /// Successful outcome.
    pub fn new(decision: Decision, obligations: Vec<Obligation>, resource_id: Option<String>) -> Self {
        Self {
            decision,
            status: Status::ok(),
            obligations,
            resource_id,
        }
    }

    /// Indeterminate outcome with a processing-error status.
    pub fn processing_error(message: impl Into<String>, resource_id: Option<String>) -> Self {
        Self {
            decision: Decision::Indeterminate,
            status: Status::processing_error(message),
            obligations: Vec::new(),
            resource_id,
        }
    }

    /// Whether this outcome carries a processing error.
    pub fn is_processing_error(&self) -> bool {
        self.status.code == StatusCode::ProcessingError
    }

    /// Obligations that apply to the decision.
    ///
    /// Obligations whose effect does not match the decision are dropped; a
    /// repeated obligation id keeps its last occurrence.
    pub fn effective_obligations(&self) -> IndexMap<&str, &Obligation> {
        let mut effective = IndexMap::new();
        for obligation in &self.obligations {
            if obligation.fulfill_on.matches(self.decision) {
                effective.insert(obligation.obligation_id.as_str(), obligation);
            }
        }
        effective
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fulfill_on_matches() {
        assert!(FulfillOn::Permit.matches(Decision::Permit));
        assert!(FulfillOn::Deny.matches(Decision::Deny));
        assert!(!FulfillOn::Permit.matches(Decision::Deny));
        assert!(!FulfillOn::Deny.matches(Decision::Permit));
        for decision in [Decision::NotApplicable, Decision::Indeterminate] {
            assert!(!FulfillOn::Permit.matches(decision));
            assert!(!FulfillOn::Deny.matches(decision));
        }
    }

    #[test]
    fn test_effective_obligations_filter_by_decision() {
        let outcome = EvaluationOutcome::new(
            Decision::Deny,
            vec![
                Obligation::new("log-it", FulfillOn::Deny),
                Obligation::new("map-account", FulfillOn::Permit),
            ],
            None,
        );
        let effective = outcome.effective_obligations();
        assert_eq!(effective.len(), 1);
        assert!(effective.contains_key("log-it"));
    }

    #[test]
    fn test_effective_obligations_empty_for_indeterminate() {
        let mut outcome = EvaluationOutcome::processing_error("boom", None);
        outcome.obligations.push(Obligation::new("log-it", FulfillOn::Deny));
        assert!(outcome.effective_obligations().is_empty());
    }

    #[test]
    fn test_processing_error_outcome() {
        let outcome = EvaluationOutcome::processing_error("no policy", Some("r".to_string()));
        assert_eq!(outcome.decision, Decision::Indeterminate);
        assert!(outcome.is_processing_error());
        assert_eq!(outcome.status.message.as_deref(), Some("no policy"));
    }

    #[test]
    fn test_decision_display() {
        assert_eq!(Decision::NotApplicable.to_string(), "NotApplicable");
    }

    #[test]
    fn test_status_urn() {
        assert!(StatusCode::ProcessingError.as_urn().ends_with("processing-error"));
    }
}
