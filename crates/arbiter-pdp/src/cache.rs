//! Policy cache with background refresh.
//!
//! The cache holds exactly one current [`PolicySnapshot`] in an
//! [`ArcSwapOption`]. Readers load the `Arc` without taking a lock and a
//! refresh publishes with a single atomic store, so a reader sees either the
//! old snapshot or the new one, never a mix, and never waits on a refresh.
//!
//! A failed refresh keeps the previous snapshot in place.
//!
//! # Example
//!
//! ```ignore
//! let cache = PolicyCache::new(Arc::new(source), CacheConfig::default());
//! cache.start_refresh()?;
//! cache.await_ready(5, Duration::from_millis(500)).await;
//! let policy = cache.current();
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arbiter_telemetry::logging::targets;
use arbiter_telemetry::metrics;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::config::CacheConfig;
use crate::error::{FetchError, PdpError, PdpResult};
use crate::policy::PolicySnapshot;
use crate::source::PolicySource;
use crate::status::ServiceStatus;

/// Result of one refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new snapshot was published.
    Success {
        /// Published policy set.
        policy_set_id: String,
        /// Published version.
        version: String,
    },
    /// Nothing was published; the previous snapshot stays current.
    Failure {
        /// Why the refresh failed.
        reason: String,
    },
}

impl RefreshOutcome {
    fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    /// Whether the refresh published a snapshot.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Clears the in-flight flag when a refresh ends or is cancelled.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct CacheInner {
    config: CacheConfig,
    source: Arc<dyn PolicySource>,
    current: ArcSwapOption<PolicySnapshot>,
    generation: AtomicU64,
    refreshing: AtomicBool,
    status: Option<Arc<ServiceStatus>>,
}

impl CacheInner {
    fn current(&self) -> Option<Arc<PolicySnapshot>> {
        self.current.load_full()
    }

    #[instrument(skip(self), target = "arbiter::policy")]
    async fn refresh(&self) -> RefreshOutcome {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            debug!(target: targets::POLICY, "policy refresh already in progress");
            return RefreshOutcome::failure("refresh already in progress");
        }
        let _in_flight = InFlight(&self.refreshing);

        info!(target: targets::POLICY, "refreshing authorization policy from policy source");

        let fetched = match self.config.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, self.source.fetch_policy())
                .await
                .unwrap_or_else(|_| Err(FetchError::Timeout(limit))),
            None => self.source.fetch_policy().await,
        };

        match fetched {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                let outcome = RefreshOutcome::Success {
                    policy_set_id: snapshot.policy_set_id().to_string(),
                    version: snapshot.version().to_string(),
                };
                self.current.store(Some(Arc::clone(&snapshot)));
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                if let Some(status) = &self.status {
                    status.update_policy(&snapshot);
                }
                metrics::record_policy_refresh(true);
                info!(
                    target: targets::POLICY,
                    policy_id = snapshot.policy_set_id(),
                    policy_version = snapshot.version(),
                    generation,
                    "loaded authorization policy"
                );
                outcome
            }
            Err(e) => {
                metrics::record_policy_refresh(false);
                error!(
                    target: targets::POLICY,
                    error = %e,
                    "error refreshing authorization policy, continuing to use existing policy"
                );
                RefreshOutcome::failure(e.to_string())
            }
        }
    }
}

struct RefreshTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Holds the current policy snapshot and keeps it fresh.
pub struct PolicyCache {
    inner: Arc<CacheInner>,
    task: Mutex<Option<RefreshTask>>,
}

impl std::fmt::Debug for PolicyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyCache")
            .field("config", &self.inner.config)
            .field("generation", &self.generation())
            .field("refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

impl PolicyCache {
    /// Creates an empty cache over `source`.
    pub fn new(source: Arc<dyn PolicySource>, config: CacheConfig) -> Self {
        Self::build(source, config, None)
    }

    /// Creates an empty cache that reports loads to `status`.
    pub fn with_status(
        source: Arc<dyn PolicySource>,
        config: CacheConfig,
        status: Arc<ServiceStatus>,
    ) -> Self {
        Self::build(source, config, Some(status))
    }

    fn build(
        source: Arc<dyn PolicySource>,
        config: CacheConfig,
        status: Option<Arc<ServiceStatus>>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                source,
                current: ArcSwapOption::empty(),
                generation: AtomicU64::new(0),
                refreshing: AtomicBool::new(false),
                status,
            }),
            task: Mutex::new(None),
        }
    }

    /// The snapshot currently published, if any has loaded.
    pub fn current(&self) -> Option<Arc<PolicySnapshot>> {
        self.inner.current()
    }

    /// Number of snapshots published so far.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Whether a refresh is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.refreshing.load(Ordering::Acquire)
    }

    /// Whether the background task is running.
    pub fn is_refresh_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Fetches and publishes a policy now.
    ///
    /// Returns a failure without fetching if another refresh is in flight.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        self.inner.refresh().await
    }

    /// Starts the background refresh task.
    ///
    /// The first refresh runs immediately; later ones follow every
    /// `refresh_interval`. A tick that comes due while a refresh is still
    /// running is skipped. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `PdpError::AlreadyRunning` if the task was already started,
    /// or `PdpError::Config` for a zero interval.
    pub fn start_refresh(&self) -> PdpResult<()> {
        let period = self.inner.config.refresh_interval;
        if period.is_zero() {
            return Err(PdpError::config("policy refresh interval must be positive"));
        }

        let mut task = self.task.lock();
        if task.is_some() {
            return Err(PdpError::AlreadyRunning("policy refresh task".to_string()));
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if inner.refreshing.load(Ordering::Acquire) {
                            debug!(target: targets::POLICY, "skipping scheduled refresh, previous refresh still running");
                            continue;
                        }
                        tokio::select! {
                            _ = inner.refresh() => {}
                            _ = shutdown_rx.changed() => break,
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }

            debug!(target: targets::POLICY, "policy refresh task stopped");
        });

        *task = Some(RefreshTask { shutdown, handle });
        info!(
            target: targets::POLICY,
            interval_secs = period.as_secs(),
            "policy refresh task started"
        );
        Ok(())
    }

    /// Stops the background refresh task and waits for it to exit.
    pub async fn stop_refresh(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await {
                warn!(target: targets::POLICY, error = %e, "policy refresh task ended abnormally");
            }
        }
    }

    /// Waits until a snapshot is available.
    ///
    /// Forces up to `retries` refreshes, sleeping `backoff` after each one
    /// that leaves the cache empty. Returns whether a snapshot is available;
    /// giving up is not an error.
    pub async fn await_ready(&self, retries: u32, backoff: Duration) -> bool {
        let mut attempt = 0;
        while self.current().is_none() && attempt < retries {
            attempt += 1;
            info!(
                target: targets::POLICY,
                attempt,
                retries,
                "authorization policy not yet loaded, forcing refresh"
            );
            if self.refresh_now().await.is_success() {
                break;
            }
            if self.current().is_none() {
                tokio::time::sleep(backoff).await;
            }
        }

        let ready = self.current().is_some();
        if !ready {
            warn!(
                target: targets::POLICY,
                retries,
                "no authorization policy loaded, requests will be answered Indeterminate until one is"
            );
        }
        ready
    }
}

impl Drop for PolicyCache {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            let _ = task.shutdown.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticPolicySource;

    fn cache_over(source: &Arc<StaticPolicySource>) -> PolicyCache {
        let source: Arc<dyn PolicySource> = Arc::clone(source) as Arc<dyn PolicySource>;
        PolicyCache::new(source, CacheConfig::default())
    }

    #[tokio::test]
    async fn test_empty_until_refreshed() {
        let source = Arc::new(StaticPolicySource::new(PolicySnapshot::new("alpha", "1")));
        let cache = cache_over(&source);
        assert!(cache.current().is_none());
        assert_eq!(cache.generation(), 0);

        let outcome = cache.refresh_now().await;
        assert_eq!(
            outcome,
            RefreshOutcome::Success {
                policy_set_id: "alpha".to_string(),
                version: "1".to_string(),
            }
        );
        assert_eq!(cache.current().unwrap().version(), "1");
        assert_eq!(cache.generation(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_same_snapshot() {
        let source = Arc::new(StaticPolicySource::new(PolicySnapshot::new("alpha", "1")));
        let cache = cache_over(&source);
        cache.refresh_now().await;
        let before = cache.current().unwrap();

        source.set_failure(FetchError::Unavailable("pap down".to_string()));
        let outcome = cache.refresh_now().await;

        assert!(!outcome.is_success());
        let after = cache.current().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(cache.generation(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_rejected() {
        let source = Arc::new(
            StaticPolicySource::new(PolicySnapshot::new("alpha", "1"))
                .with_delay(Duration::from_millis(200)),
        );
        let cache = Arc::new(cache_over(&source));

        let background = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.refresh_now().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.is_refreshing());

        let second = cache.refresh_now().await;
        assert_eq!(
            second,
            RefreshOutcome::Failure {
                reason: "refresh already in progress".to_string()
            }
        );

        assert!(background.await.unwrap().is_success());
        assert!(!cache.is_refreshing());
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let source: Arc<dyn PolicySource> = Arc::new(
            StaticPolicySource::new(PolicySnapshot::new("alpha", "1"))
                .with_delay(Duration::from_secs(5)),
        );
        let cache = PolicyCache::new(
            source,
            CacheConfig::default().with_fetch_timeout(Duration::from_millis(20)),
        );

        match cache.refresh_now().await {
            RefreshOutcome::Failure { reason } => assert!(reason.contains("timed out")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!cache.is_refreshing());
    }

    #[tokio::test]
    async fn test_publish_updates_status() {
        let status = Arc::new(ServiceStatus::new("arbiter", "test"));
        let source: Arc<dyn PolicySource> =
            Arc::new(StaticPolicySource::new(PolicySnapshot::new("alpha", "4")));
        let cache = PolicyCache::with_status(source, CacheConfig::default(), Arc::clone(&status));

        cache.refresh_now().await;
        assert_eq!(status.policy().unwrap().version, "4");
    }

    #[tokio::test]
    async fn test_status_follows_published_snapshot() {
        let status = Arc::new(ServiceStatus::new("arbiter", "test"));
        let source = Arc::new(StaticPolicySource::new(PolicySnapshot::new("alpha", "1")));
        let cache = PolicyCache::with_status(
            Arc::clone(&source) as Arc<dyn PolicySource>,
            CacheConfig::default(),
            Arc::clone(&status),
        );

        for version in ["2", "3"] {
            source.set_policy(PolicySnapshot::new("alpha", version));
            cache.refresh_now().await;
            let current = cache.current().unwrap();
            let reported = status.policy().unwrap();
            assert_eq!(reported.version, current.version());
            assert_eq!(reported.loaded_at, current.loaded_at());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_see_whole_snapshots_during_refresh() {
        let source = Arc::new(StaticPolicySource::new(PolicySnapshot::new("alpha", "0")));
        let cache = Arc::new(PolicyCache::new(
            Arc::clone(&source) as Arc<dyn PolicySource>,
            CacheConfig::default(),
        ));
        cache.refresh_now().await;

        let mut readers = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            readers.push(tokio::spawn(async move {
                let mut last = 0_u32;
                for _ in 0..500 {
                    let snapshot = cache.current().unwrap();
                    let version: u32 = snapshot.version().parse().unwrap();
                    assert!(version >= last, "version went backwards");
                    last = version;
                    tokio::task::yield_now().await;
                }
            }));
        }

        for version in 1..=20 {
            source.set_policy(PolicySnapshot::new("alpha", version.to_string()));
            cache.refresh_now().await;
        }
        for reader in readers {
            reader.await.unwrap();
        }

        let first = cache.current().unwrap();
        let second = cache.current().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.version(), "20");
    }

    #[tokio::test]
    async fn test_await_ready_gives_up() {
        let source = Arc::new(StaticPolicySource::unavailable());
        let cache = cache_over(&source);

        let ready = cache.await_ready(3, Duration::from_millis(1)).await;
        assert!(!ready);
        assert_eq!(source.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_await_ready_after_transient_failures() {
        let source = Arc::new(StaticPolicySource::new(PolicySnapshot::new("alpha", "1")));
        source.push_result(Err(FetchError::Unavailable("starting".to_string())));
        source.push_result(Err(FetchError::Unavailable("starting".to_string())));
        let cache = cache_over(&source);

        assert!(cache.await_ready(5, Duration::from_millis(1)).await);
        assert_eq!(source.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_await_ready_when_loaded_does_not_fetch() {
        let source = Arc::new(StaticPolicySource::new(PolicySnapshot::new("alpha", "1")));
        let cache = cache_over(&source);
        cache.refresh_now().await;

        assert!(cache.await_ready(5, Duration::from_millis(1)).await);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_task_runs_immediately_then_periodically() {
        let source = Arc::new(StaticPolicySource::new(PolicySnapshot::new("alpha", "1")));
        let source_dyn: Arc<dyn PolicySource> = Arc::clone(&source) as Arc<dyn PolicySource>;
        let cache = PolicyCache::new(
            source_dyn,
            CacheConfig::default().with_refresh_interval(Duration::from_secs(60)),
        );

        cache.start_refresh().unwrap();
        assert!(cache.start_refresh().is_err());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.fetch_count(), 1);
        assert!(cache.current().is_some());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.fetch_count(), 2);

        cache.stop_refresh().await;
        assert!(!cache.is_refresh_running());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(source.fetch_count(), 2);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let source: Arc<dyn PolicySource> = Arc::new(StaticPolicySource::unavailable());
        let cache = PolicyCache::new(
            source,
            CacheConfig::default().with_refresh_interval(Duration::ZERO),
        );
        assert!(matches!(cache.start_refresh(), Err(PdpError::Config(_))));
    }
}
