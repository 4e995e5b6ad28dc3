//! The `Pdp` service: cache, pipeline and admission wired together.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::admission::AdmissionShell;
use crate::cache::{PolicyCache, RefreshOutcome};
use crate::config::PdpConfig;
use crate::engine::EvaluationEngine;
use crate::error::{AdmissionError, PdpError, PdpResult};
use crate::obligation::ObligationRegistry;
use crate::pip::PolicyInformationPoint;
use crate::pipeline::{FinalResult, RequestPipeline};
use crate::request::AuthorizationRequest;
use crate::source::PolicySource;
use crate::status::{ServiceStatus, StatusReport};

/// A policy decision point.
///
/// Built with [`Pdp::builder`], started with [`Pdp::start`]. Requests go
/// through the admission shell; admin operations run beside it.
pub struct Pdp {
    config: PdpConfig,
    cache: Arc<PolicyCache>,
    pipeline: Arc<RequestPipeline>,
    status: Arc<ServiceStatus>,
    admission: RwLock<Option<Arc<AdmissionShell>>>,
}

impl std::fmt::Debug for Pdp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pdp")
            .field("config", &self.config)
            .field("pipeline", &self.pipeline)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Pdp {
    /// Starts building a decision point.
    pub fn builder() -> PdpBuilder {
        PdpBuilder::default()
    }

    /// Brings the service up.
    ///
    /// Starts the PIPs and the policy refresh task, waits on the readiness
    /// gate, then opens admission. An exhausted gate is logged and the
    /// service opens anyway; requests are answered Indeterminate until a
    /// policy loads.
    ///
    /// # Errors
    ///
    /// Returns an error if the service is already running, a PIP fails to
    /// start, or the refresh task or admission shell cannot start.
    pub async fn start(&self) -> PdpResult<()> {
        if self.is_running() {
            return Err(PdpError::AlreadyRunning("policy decision point".to_string()));
        }

        let pips = self.pipeline.pips();
        for (started, pip) in pips.iter().enumerate() {
            if let Err(e) = pip.start().await {
                error!(pip_id = pip.id(), error = %e, "policy information point failed to start");
                stop_pips(&pips[..started]).await;
                return Err(e.into());
            }
            info!(pip_id = pip.id(), "started policy information point");
        }

        if let Err(e) = self.cache.start_refresh() {
            stop_pips(pips).await;
            return Err(e);
        }

        let cache_config = self.cache.config();
        let ready = self
            .cache
            .await_ready(cache_config.startup_retries, cache_config.startup_backoff)
            .await;
        if !ready {
            warn!("starting without an authorization policy");
        }

        let shell = match AdmissionShell::start(Arc::clone(&self.pipeline), self.config.admission.clone()) {
            Ok(shell) => shell,
            Err(e) => {
                error!(error = %e, "admission failed to start, rolling back");
                self.cache.stop_refresh().await;
                stop_pips(pips).await;
                return Err(e);
            }
        };
        *self.admission.write() = Some(Arc::new(shell));

        info!(
            service = %self.config.service_name,
            entity_id = %self.config.entity_id,
            policy_loaded = ready,
            "policy decision point started"
        );
        Ok(())
    }

    /// Stops admission, the refresh task and the PIPs, in that order.
    pub async fn shutdown(&self) {
        let shell = self.admission.write().take();
        if let Some(shell) = shell {
            shell.shutdown().await;
        }

        self.cache.stop_refresh().await;
        stop_pips(self.pipeline.pips()).await;

        info!(service = %self.config.service_name, "policy decision point stopped");
    }

    /// Whether admission is open.
    pub fn is_running(&self) -> bool {
        self.admission.read().is_some()
    }

    /// Evaluates a request through admission control.
    ///
    /// # Errors
    ///
    /// `AdmissionError::Busy` when saturated, `AdmissionError::Closed` when
    /// not running.
    pub async fn authorize(&self, request: AuthorizationRequest) -> Result<FinalResult, AdmissionError> {
        let shell = self.admission.read().clone().ok_or(AdmissionError::Closed)?;
        shell.submit(request).await
    }

    /// Reloads the policy on a task separate from the request workers.
    pub async fn reload_policy(&self) -> RefreshOutcome {
        info!("policy reload requested");
        let cache = Arc::clone(&self.cache);
        match tokio::spawn(async move { cache.refresh_now().await }).await {
            Ok(outcome) => outcome,
            Err(e) => RefreshOutcome::Failure {
                reason: format!("reload task failed: {e}"),
            },
        }
    }

    /// Current status.
    pub fn status(&self) -> StatusReport {
        self.status.report()
    }

    /// Shared status counters.
    pub fn service_status(&self) -> &Arc<ServiceStatus> {
        &self.status
    }

    /// The obligation registry, for admin registration.
    pub fn registry(&self) -> &Arc<ObligationRegistry> {
        self.pipeline.registry()
    }

    /// The policy cache.
    pub fn cache(&self) -> &Arc<PolicyCache> {
        &self.cache
    }

    /// Service configuration.
    pub fn config(&self) -> &PdpConfig {
        &self.config
    }
}

async fn stop_pips(pips: &[Arc<dyn PolicyInformationPoint>]) {
    for pip in pips.iter().rev() {
        if let Err(e) = pip.stop().await {
            error!(pip_id = pip.id(), error = %e, "policy information point failed to stop");
        }
    }
}

/// Builder for [`Pdp`].
#[derive(Default)]
pub struct PdpBuilder {
    config: PdpConfig,
    source: Option<Arc<dyn PolicySource>>,
    engine: Option<Arc<dyn EvaluationEngine>>,
    pips: Vec<Arc<dyn PolicyInformationPoint>>,
    registry: Option<Arc<ObligationRegistry>>,
}

impl PdpBuilder {
    /// Sets the configuration.
    pub fn config(mut self, config: PdpConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the policy source.
    pub fn source(mut self, source: Arc<dyn PolicySource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the evaluation engine.
    pub fn engine(mut self, engine: Arc<dyn EvaluationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Appends a PIP.
    pub fn pip(mut self, pip: Arc<dyn PolicyInformationPoint>) -> Self {
        self.pips.push(pip);
        self
    }

    /// Uses an existing obligation registry.
    pub fn registry(mut self, registry: Arc<ObligationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Builds the service.
    ///
    /// # Errors
    ///
    /// Returns `PdpError::Config` if the source or engine is missing.
    pub fn build(self) -> PdpResult<Pdp> {
        let source = self
            .source
            .ok_or_else(|| PdpError::config("a policy source is required"))?;
        let engine = self
            .engine
            .ok_or_else(|| PdpError::config("an evaluation engine is required"))?;

        let status = Arc::new(ServiceStatus::new(
            self.config.service_name.clone(),
            env!("CARGO_PKG_VERSION"),
        ));
        let cache = Arc::new(PolicyCache::with_status(
            source,
            self.config.cache.clone(),
            Arc::clone(&status),
        ));

        let mut pipeline = RequestPipeline::new(Arc::clone(&cache), engine)
            .with_registry(self.registry.unwrap_or_default())
            .with_status(Arc::clone(&status));
        if let Some(timeout) = self.config.pip_timeout {
            pipeline = pipeline.with_pip_timeout(timeout);
        }
        for pip in self.pips {
            pipeline = pipeline.with_pip(pip);
        }

        Ok(Pdp {
            config: self.config,
            cache,
            pipeline: Arc::new(pipeline),
            status,
            admission: RwLock::new(None),
        })
    }
}
