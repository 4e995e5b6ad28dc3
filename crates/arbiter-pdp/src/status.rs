//! Service status counters for the admin surface.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::policy::PolicySnapshot;

/// Identity and load time of the policy in effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyInfo {
    /// Policy set identifier.
    pub policy_set_id: String,
    /// Policy version.
    pub version: String,
    /// When the policy was loaded.
    pub loaded_at: DateTime<Utc>,
}

/// Live counters maintained by the pipeline, admission shell and cache.
#[derive(Debug)]
pub struct ServiceStatus {
    service_name: String,
    service_version: String,
    started_at: DateTime<Utc>,
    total_requests: AtomicU64,
    pipeline_errors: AtomicU64,
    transport_errors: AtomicU64,
    admission_rejections: AtomicU64,
    policy: RwLock<Option<PolicyInfo>>,
}

impl ServiceStatus {
    /// Creates counters for a service starting now.
    pub fn new(service_name: impl Into<String>, service_version: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            started_at: Utc::now(),
            total_requests: AtomicU64::new(0),
            pipeline_errors: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            admission_rejections: AtomicU64::new(0),
            policy: RwLock::new(None),
        }
    }

    /// Counts one completed pipeline run.
    pub fn record_request(&self, errored: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if errored {
            self.pipeline_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counts an error for a request that never reached the pipeline or
    /// whose answer never left it.
    pub fn record_request_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a request refused by admission control.
    pub fn record_rejection(&self) {
        self.admission_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the policy now in effect.
    pub fn update_policy(&self, snapshot: &PolicySnapshot) {
        *self.policy.write() = Some(PolicyInfo {
            policy_set_id: snapshot.policy_set_id().to_string(),
            version: snapshot.version().to_string(),
            loaded_at: snapshot.loaded_at(),
        });
    }

    /// Total completed requests.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Total request errors, inside and outside the pipeline.
    pub fn total_request_errors(&self) -> u64 {
        self.pipeline_errors() + self.transport_errors.load(Ordering::Relaxed)
    }

    /// Pipeline runs that ended in an error result.
    pub fn pipeline_errors(&self) -> u64 {
        self.pipeline_errors.load(Ordering::Relaxed)
    }

    /// Total admission rejections.
    pub fn admission_rejections(&self) -> u64 {
        self.admission_rejections.load(Ordering::Relaxed)
    }

    /// Policy currently in effect.
    pub fn policy(&self) -> Option<PolicyInfo> {
        self.policy.read().clone()
    }

    /// Point-in-time copy of all counters.
    pub fn report(&self) -> StatusReport {
        let total_requests = self.total_requests();
        let pipeline_errors = self.pipeline_errors();
        StatusReport {
            service: self.service_name.clone(),
            version: self.service_version.clone(),
            status: "OK".to_string(),
            start_time: self.started_at,
            total_requests,
            total_completed_requests: total_requests.saturating_sub(pipeline_errors),
            total_request_errors: self.total_request_errors(),
            admission_rejections: self.admission_rejections(),
            policy: self.policy(),
        }
    }
}

/// Serialisable status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Overall status.
    pub status: String,
    /// Service start time.
    pub start_time: DateTime<Utc>,
    /// Completed pipeline runs.
    pub total_requests: u64,
    /// Runs that finished without a request error.
    pub total_completed_requests: u64,
    /// Request errors, including decode failures.
    pub total_request_errors: u64,
    /// Requests refused as service-busy.
    pub admission_rejections: u64,
    /// Policy in effect.
    pub policy: Option<PolicyInfo>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "service: {}", self.service)?;
        writeln!(f, "version: {}", self.version)?;
        writeln!(f, "status: {}", self.status)?;
        writeln!(f, "start_time: {}", self.start_time.timestamp_millis())?;
        writeln!(f, "total_requests: {}", self.total_requests)?;
        writeln!(f, "total_completed_requests: {}", self.total_completed_requests)?;
        writeln!(f, "total_request_errors: {}", self.total_request_errors)?;
        writeln!(f, "admission_rejections: {}", self.admission_rejections)?;
        match &self.policy {
            Some(policy) => {
                writeln!(f, "policy_load_instant: {}", policy.loaded_at.to_rfc3339())?;
                writeln!(f, "current_policy: {}", policy.policy_set_id)?;
                writeln!(f, "current_policy_version: {}", policy.version)
            }
            None => {
                writeln!(f, "policy_load_instant: ")?;
                writeln!(f, "current_policy: ")?;
                writeln!(f, "current_policy_version: ")
            }
        }
    }
}
