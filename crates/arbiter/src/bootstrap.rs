//! Building a served decision point from configuration.

use std::sync::Arc;

use arbiter_config::{ArbiterConfig, ConfigError};
use arbiter_pdp::{
    EvaluationEngine, ObligationRegistry, Pdp, PdpError, PolicyInformationPoint, PolicySource,
};
use arbiter_server::{Server, ServerConfig, ServerError, ShutdownSignal};
use arbiter_telemetry::{init_telemetry, TelemetryError};
use thiserror::Error;
use tracing::info;

/// Errors raised while bringing a decision point up from configuration.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The configuration is invalid or incomplete.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Logging or metrics could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// The decision point could not be built.
    #[error(transparent)]
    Pdp(#[from] PdpError),

    /// The listeners failed.
    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Assembles a [`Server`] from an [`ArbiterConfig`].
///
/// The policy source defaults to a PAP client built from the `[policy]`
/// section. The evaluation engine has no default.
///
/// # Example
///
/// ```rust,ignore
/// let config = ConfigLoader::new()
///     .with_optional_file("arbiter.toml")?
///     .with_env_prefix("ARBITER")
///     .load()?;
///
/// Bootstrap::new(config)
///     .engine(Arc::new(my_engine))
///     .run(ShutdownSignal::with_os_signals())
///     .await?;
/// ```
pub struct Bootstrap {
    config: ArbiterConfig,
    engine: Option<Arc<dyn EvaluationEngine>>,
    source: Option<Arc<dyn PolicySource>>,
    registry: Option<Arc<ObligationRegistry>>,
    pips: Vec<Arc<dyn PolicyInformationPoint>>,
}

impl std::fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrap")
            .field("config", &self.config)
            .field("has_engine", &self.engine.is_some())
            .field("has_source", &self.source.is_some())
            .field("pips", &self.pips.len())
            .finish_non_exhaustive()
    }
}

impl Bootstrap {
    /// Starts from a loaded configuration.
    pub fn new(config: ArbiterConfig) -> Self {
        Self {
            config,
            engine: None,
            source: None,
            registry: None,
            pips: Vec::new(),
        }
    }

    /// Sets the evaluation engine.
    pub fn engine(mut self, engine: Arc<dyn EvaluationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Replaces the configured PAP client.
    pub fn source(mut self, source: Arc<dyn PolicySource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Uses a pre-populated obligation registry.
    pub fn registry(mut self, registry: Arc<ObligationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Appends a policy information point.
    pub fn pip(mut self, pip: Arc<dyn PolicyInformationPoint>) -> Self {
        self.pips.push(pip);
        self
    }

    /// Validates the configuration and builds the server without starting it.
    pub fn build(self) -> Result<Server, BootstrapError> {
        self.config.validate()?;

        let source = match self.source {
            Some(source) => source,
            None => Arc::new(self.config.pap_client()?),
        };

        let mut builder = Pdp::builder()
            .config(self.config.pdp_config())
            .source(source);
        if let Some(engine) = self.engine {
            builder = builder.engine(engine);
        }
        if let Some(registry) = self.registry {
            builder = builder.registry(registry);
        }
        for pip in self.pips {
            builder = builder.pip(pip);
        }

        let pdp = Arc::new(builder.build()?);
        Ok(Server::new(pdp, ServerConfig::from(&self.config.service)))
    }

    /// Installs telemetry, builds the server and serves until `shutdown`
    /// fires.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<(), BootstrapError> {
        init_telemetry(&self.config.telemetry_config())?;
        info!(
            service = %self.config.service.service_name,
            policy_set_id = %self.config.policy.policy_set_id,
            "bootstrapping policy decision point"
        );
        self.build()?.run(shutdown).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_pdp::{
        AuthorizationRequest, Decision, EngineError, EvaluationOutcome, PolicySnapshot,
        StaticPolicySource,
    };

    fn engine() -> Arc<dyn EvaluationEngine> {
        Arc::new(
            |_: &AuthorizationRequest, _: &PolicySnapshot| -> Result<EvaluationOutcome, EngineError> {
                Ok(EvaluationOutcome::new(Decision::Deny, Vec::new(), None))
            },
        )
    }

    fn configured() -> ArbiterConfig {
        let mut config = ArbiterConfig::default();
        config.service.entity_id = "https://pdp.example.org".to_string();
        config.service.http_addr = "127.0.0.1:9152".to_string();
        config.policy.policy_set_id = "grid-policy".to_string();
        config.policy.paps = vec!["http://localhost:8150/query".to_string()];
        config
    }

    #[test]
    fn test_build_from_config() {
        let server = Bootstrap::new(configured()).engine(engine()).build().unwrap();
        assert_eq!(server.config().http_addr(), "127.0.0.1:9152");
        assert_eq!(server.pdp().config().entity_id, "https://pdp.example.org");
        assert!(!server.pdp().is_running());
    }

    #[test]
    fn test_build_requires_engine() {
        let err = Bootstrap::new(configured()).build().unwrap_err();
        assert!(matches!(err, BootstrapError::Pdp(PdpError::Config(_))));
    }

    #[test]
    fn test_build_requires_policy_source() {
        let err = Bootstrap::new(ArbiterConfig::default())
            .engine(engine())
            .build()
            .unwrap_err();
        assert!(matches!(err, BootstrapError::Config(_)));
    }

    #[test]
    fn test_source_override_skips_pap_client() {
        let source = Arc::new(StaticPolicySource::new(PolicySnapshot::new("alpha", "1")));
        let server = Bootstrap::new(ArbiterConfig::default())
            .engine(engine())
            .source(source)
            .build()
            .unwrap();
        assert_eq!(server.pdp().cache().generation(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = configured();
        config.admission.max_requests = 0;
        let err = Bootstrap::new(config).engine(engine()).build().unwrap_err();
        assert!(matches!(err, BootstrapError::Config(_)));
    }
}
