//! Configuration for the decision point.

use std::time::Duration;

/// Policy cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Period between background refreshes (the policy retention interval).
    pub refresh_interval: Duration,
    /// Upper bound on one policy fetch.
    pub fetch_timeout: Option<Duration>,
    /// Readiness gate attempts before serving without a policy.
    pub startup_retries: u32,
    /// Pause between readiness gate attempts.
    pub startup_backoff: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(240 * 60),
            fetch_timeout: Some(Duration::from_secs(30)),
            startup_retries: 5,
            startup_backoff: Duration::from_millis(500),
        }
    }
}

impl CacheConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Production cache configuration.
    pub fn production() -> Self {
        Self::default()
    }

    /// Development cache configuration: frequent refreshes, short gate.
    pub fn development() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            fetch_timeout: Some(Duration::from_secs(5)),
            startup_retries: 2,
            startup_backoff: Duration::from_millis(250),
        }
    }

    /// Set the refresh interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set the refresh interval in minutes.
    pub fn with_retention_interval_mins(mut self, minutes: u64) -> Self {
        self.refresh_interval = Duration::from_secs(minutes.saturating_mul(60));
        self
    }

    /// Set the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Let fetches run as long as the source takes.
    pub fn without_fetch_timeout(mut self) -> Self {
        self.fetch_timeout = None;
        self
    }

    /// Set the readiness gate bounds.
    pub fn with_startup_gate(mut self, retries: u32, backoff: Duration) -> Self {
        self.startup_retries = retries;
        self.startup_backoff = backoff;
        self
    }
}

/// Admission shell configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Number of worker tasks.
    pub max_requests: usize,
    /// Waiting requests beyond the busy workers; `None` queues without bound.
    pub queue_capacity: Option<usize>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_requests: 200,
            queue_capacity: Some(500),
        }
    }
}

impl AdmissionConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count.
    pub fn with_max_requests(mut self, workers: usize) -> Self {
        self.max_requests = workers;
        self
    }

    /// Set the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Queue without bound.
    pub fn with_unbounded_queue(mut self) -> Self {
        self.queue_capacity = None;
        self
    }
}

/// Configuration for the whole decision point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdpConfig {
    /// Service name reported by the status operation.
    pub service_name: String,
    /// Entity id the decision point identifies itself with.
    pub entity_id: String,
    /// Policy cache configuration.
    pub cache: CacheConfig,
    /// Admission configuration.
    pub admission: AdmissionConfig,
    /// Upper bound on each PIP call.
    pub pip_timeout: Option<Duration>,
}

impl Default for PdpConfig {
    fn default() -> Self {
        Self {
            service_name: "arbiter".to_string(),
            entity_id: "arbiter".to_string(),
            cache: CacheConfig::default(),
            admission: AdmissionConfig::default(),
            pip_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl PdpConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Production configuration.
    pub fn production() -> Self {
        Self {
            cache: CacheConfig::production(),
            ..Self::default()
        }
    }

    /// Development configuration.
    pub fn development() -> Self {
        Self {
            cache: CacheConfig::development(),
            admission: AdmissionConfig::default()
                .with_max_requests(8)
                .with_queue_capacity(32),
            ..Self::default()
        }
    }

    /// Set the service name.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the entity id.
    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = entity_id.into();
        self
    }

    /// Set the cache configuration.
    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Set the admission configuration.
    pub fn with_admission_config(mut self, config: AdmissionConfig) -> Self {
        self.admission = config;
        self
    }

    /// Set the PIP timeout.
    pub fn with_pip_timeout(mut self, timeout: Duration) -> Self {
        self.pip_timeout = Some(timeout);
        self
    }
}
