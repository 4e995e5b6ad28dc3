//! Policy sources.
//!
//! The cache pulls policy documents from a [`PolicySource`]. [`PapClient`]
//! queries one or more policy administration points over HTTP;
//! [`StaticPolicySource`] serves scripted results from memory.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use arbiter_telemetry::logging::targets;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{FetchError, PdpError, PdpResult};
use crate::policy::{PolicyDocument, PolicySnapshot};

/// Supplies policy snapshots to the cache.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Fetches the current policy document.
    async fn fetch_policy(&self) -> Result<PolicySnapshot, FetchError>;
}

/// Query sent to a policy administration point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyQuery {
    /// Unique query id.
    pub query_id: String,
    /// Entity id of the querying decision point.
    pub issuer: String,
    /// When the query was issued.
    pub issue_instant: DateTime<Utc>,
    /// Requested policy set.
    pub policy_set_id: String,
}

/// Answer from a policy administration point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyQueryResponse {
    /// Returned policy sets; only the first is used.
    #[serde(default)]
    pub policy_sets: Vec<PolicyDocument>,
}

/// HTTP client for policy administration points.
///
/// Endpoints are tried in configuration order; the first one that answers
/// with a policy wins.
#[derive(Debug, Clone)]
pub struct PapClient {
    client: reqwest::Client,
    endpoints: Vec<String>,
    policy_set_id: String,
    entity_id: String,
}

impl PapClient {
    /// Creates a client for `policy_set_id` served by `endpoints`.
    ///
    /// # Errors
    ///
    /// Returns `PdpError::Config` if no endpoint is given or the HTTP client
    /// cannot be built.
    pub fn new(
        policy_set_id: impl Into<String>,
        endpoints: Vec<String>,
        timeout: Duration,
    ) -> PdpResult<Self> {
        if endpoints.is_empty() {
            return Err(PdpError::config(
                "at least one policy administration point endpoint is required",
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PdpError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoints,
            policy_set_id: policy_set_id.into(),
            entity_id: "arbiter".to_string(),
        })
    }

    /// Sets the entity id sent as query issuer.
    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = entity_id.into();
        self
    }

    /// Configured endpoints.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn query(&self, endpoint: &str) -> Result<PolicySnapshot, FetchError> {
        let query = PolicyQuery {
            query_id: Uuid::now_v7().to_string(),
            issuer: self.entity_id.clone(),
            issue_instant: Utc::now(),
            policy_set_id: self.policy_set_id.clone(),
        };

        debug!(target: targets::POLICY, endpoint, query_id = %query.query_id, "querying policy administration point");

        let response = self
            .client
            .post(endpoint)
            .json(&query)
            .send()
            .await
            .map_err(|e| FetchError::endpoint(endpoint, e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::endpoint(
                endpoint,
                format!("returned status {}", response.status()),
            ));
        }

        let body: PolicyQueryResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("{endpoint}: {e}")))?;

        let count = body.policy_sets.len();
        let Some(document) = body.policy_sets.into_iter().next() else {
            return Err(FetchError::NoPolicy(self.policy_set_id.clone()));
        };

        if count > 1 {
            warn!(
                target: targets::POLICY,
                endpoint,
                count,
                "policy administration point returned more than one policy set, only the first will be used"
            );
        }
        if document.policy_set_id != self.policy_set_id {
            warn!(
                target: targets::POLICY,
                endpoint,
                requested = %self.policy_set_id,
                returned = %document.policy_set_id,
                "policy administration point returned a different policy set than requested"
            );
        }

        Ok(document.into())
    }
}

#[async_trait]
impl PolicySource for PapClient {
    async fn fetch_policy(&self) -> Result<PolicySnapshot, FetchError> {
        let mut failures = Vec::with_capacity(self.endpoints.len());

        for endpoint in &self.endpoints {
            match self.query(endpoint).await {
                Ok(snapshot) => {
                    info!(
                        target: targets::POLICY,
                        endpoint = %endpoint,
                        policy_id = snapshot.policy_set_id(),
                        policy_version = snapshot.version(),
                        "retrieved policy from policy administration point"
                    );
                    return Ok(snapshot);
                }
                Err(e) => {
                    warn!(target: targets::POLICY, endpoint = %endpoint, error = %e, "policy administration point query failed");
                    failures.push(e.to_string());
                }
            }
        }

        Err(FetchError::AllEndpointsFailed(failures))
    }
}

struct Script {
    pending: VecDeque<Result<PolicySnapshot, FetchError>>,
    fallback: Result<PolicySnapshot, FetchError>,
}

/// In-memory policy source with scripted results.
///
/// Queued results are served first, in order; afterwards every fetch returns
/// the fallback.
pub struct StaticPolicySource {
    script: Mutex<Script>,
    delay: Option<Duration>,
    fetches: AtomicUsize,
}

impl std::fmt::Debug for StaticPolicySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticPolicySource")
            .field("delay", &self.delay)
            .field("fetches", &self.fetch_count())
            .finish_non_exhaustive()
    }
}

impl StaticPolicySource {
    /// Always serves `snapshot`.
    pub fn new(snapshot: PolicySnapshot) -> Self {
        Self::with_fallback(Ok(snapshot))
    }

    /// Always fails as unavailable.
    pub fn unavailable() -> Self {
        Self::with_fallback(Err(FetchError::Unavailable(
            "no policy configured".to_string(),
        )))
    }

    fn with_fallback(fallback: Result<PolicySnapshot, FetchError>) -> Self {
        Self {
            script: Mutex::new(Script {
                pending: VecDeque::new(),
                fallback,
            }),
            delay: None,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Sleeps before answering each fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues a one-shot result.
    pub fn push_result(&self, result: Result<PolicySnapshot, FetchError>) {
        self.script.lock().pending.push_back(result);
    }

    /// Serves `snapshot` from now on.
    pub fn set_policy(&self, snapshot: PolicySnapshot) {
        self.script.lock().fallback = Ok(snapshot);
    }

    /// Fails with `error` from now on.
    pub fn set_failure(&self, error: FetchError) {
        self.script.lock().fallback = Err(error);
    }

    /// Number of fetches served.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Acquire)
    }
}

#[async_trait]
impl PolicySource for StaticPolicySource {
    async fn fetch_policy(&self) -> Result<PolicySnapshot, FetchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.fetches.fetch_add(1, Ordering::AcqRel);

        let mut script = self.script.lock();
        match script.pending.pop_front() {
            Some(result) => result,
            None => script.fallback.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_serves_snapshot() {
        let source = StaticPolicySource::new(PolicySnapshot::new("alpha", "1"));
        let snapshot = source.fetch_policy().await.unwrap();
        assert_eq!(snapshot.policy_set_id(), "alpha");
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_static_source_script_then_fallback() {
        let source = StaticPolicySource::unavailable();
        source.push_result(Ok(PolicySnapshot::new("alpha", "1")));

        assert!(source.fetch_policy().await.is_ok());
        assert!(matches!(
            source.fetch_policy().await,
            Err(FetchError::Unavailable(_))
        ));

        source.set_policy(PolicySnapshot::new("alpha", "2"));
        assert_eq!(source.fetch_policy().await.unwrap().version(), "2");
        assert_eq!(source.fetch_count(), 3);
    }

    #[test]
    fn test_pap_client_requires_endpoint() {
        let err = PapClient::new("alpha", Vec::new(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, PdpError::Config(_)));
    }

    #[tokio::test]
    async fn test_pap_client_all_endpoints_failed() {
        let client = PapClient::new(
            "alpha",
            vec![
                "http://127.0.0.1:1/pap".to_string(),
                "http://127.0.0.1:2/pap".to_string(),
            ],
            Duration::from_secs(2),
        )
        .unwrap();

        match client.fetch_policy().await {
            Err(FetchError::AllEndpointsFailed(failures)) => assert_eq!(failures.len(), 2),
            other => panic!("expected AllEndpointsFailed, got {other:?}"),
        }
    }
}
