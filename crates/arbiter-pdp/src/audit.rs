//! Audit records, one per completed request.

use std::fmt;

use arbiter_telemetry::logging::targets;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::outcome::Decision;
use crate::pipeline::FinalResult;

/// One audit log line.
///
/// Renders as `timestamp|requester|request|policyId|policyVersion|decision|responseId|`
/// with missing values left empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Completion time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Requester identity.
    pub requester_id: Option<String>,
    /// Request identifier.
    pub request_id: String,
    /// Policy set in effect.
    pub policy_id: Option<String>,
    /// Policy version in effect.
    pub policy_version: Option<String>,
    /// Final decision.
    pub decision: Decision,
    /// Response identifier.
    pub response_id: String,
}

impl AuditRecord {
    /// Builds the record for a final result.
    pub fn from_result(result: &FinalResult) -> Self {
        Self {
            timestamp_ms: result.completed_at.timestamp_millis(),
            requester_id: result.requester_id.clone(),
            request_id: result.request_id.clone(),
            policy_id: result.policy.as_ref().map(|p| p.policy_set_id.clone()),
            policy_version: result.policy.as_ref().map(|p| p.version.clone()),
            decision: result.outcome.decision,
            response_id: result.response_id.clone(),
        }
    }

    /// Writes the record to the audit target.
    pub fn emit(&self) {
        info!(target: targets::AUDIT, "{self}");
    }
}

impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}|{}|{}|",
            self.timestamp_ms,
            self.requester_id.as_deref().unwrap_or_default(),
            self.request_id,
            self.policy_id.as_deref().unwrap_or_default(),
            self.policy_version.as_deref().unwrap_or_default(),
            self.decision,
            self.response_id,
        )
    }
}
