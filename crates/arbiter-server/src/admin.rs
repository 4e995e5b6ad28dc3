//! The admin listener: status, policy reload, health and metrics.

use std::sync::Arc;

use arbiter_pdp::{Pdp, PolicySnapshot, RefreshOutcome};
use arbiter_telemetry::render_metrics;
use async_trait::async_trait;
use http::{Method, Request, StatusCode};
use hyper::body::Incoming;
use serde::Serialize;
use tracing::{info, warn};

use crate::listener::{self, Endpoint, HttpResponse};
use crate::server::STATUS_PATH;

/// Path of the policy reload operation.
pub const RELOAD_PATH: &str = "/reloadPolicy";

/// Path of the health probe.
pub const HEALTH_PATH: &str = "/health";

/// Path of the Prometheus scrape page.
pub const METRICS_PATH: &str = "/metrics";

#[derive(Debug, Serialize)]
struct Health<'a> {
    status: &'static str,
    running: bool,
    policy_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy_set_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy_version: Option<&'a str>,
}

/// Answers the admin operations.
#[derive(Debug)]
pub struct AdminEndpoint {
    pdp: Arc<Pdp>,
}

impl AdminEndpoint {
    /// Creates the endpoint.
    pub fn new(pdp: Arc<Pdp>) -> Self {
        Self { pdp }
    }

    async fn reload(&self) -> HttpResponse {
        match self.pdp.reload_policy().await {
            RefreshOutcome::Success {
                policy_set_id,
                version,
            } => {
                info!(%policy_set_id, %version, "policy reloaded by admin request");
                listener::text_response(
                    StatusCode::OK,
                    format!("policy reloaded: {policy_set_id} version {version}\n"),
                )
            }
            RefreshOutcome::Failure { reason } => {
                warn!(%reason, "admin policy reload failed");
                listener::text_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!("policy reload failed: {reason}\n"),
                )
            }
        }
    }

    fn health(&self) -> HttpResponse {
        let running = self.pdp.is_running();
        let snapshot = self.pdp.cache().current();

        let health = Health {
            status: match (running, snapshot.is_some()) {
                (true, true) => "healthy",
                (true, false) => "degraded",
                (false, _) => "stopped",
            },
            running,
            policy_loaded: snapshot.is_some(),
            policy_set_id: snapshot.as_deref().map(PolicySnapshot::policy_set_id),
            policy_version: snapshot.as_deref().map(PolicySnapshot::version),
        };

        let status = if running {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        listener::json_response(status, &health)
    }
}

#[async_trait]
impl Endpoint for AdminEndpoint {
    fn name(&self) -> &'static str {
        "admin"
    }

    async fn handle(&self, request: Request<Incoming>) -> HttpResponse {
        let method = request.method();
        match (method, request.uri().path()) {
            (&Method::GET, STATUS_PATH) => {
                listener::text_response(StatusCode::OK, self.pdp.status().to_string())
            }
            (&Method::GET | &Method::POST, RELOAD_PATH) => self.reload().await,
            (&Method::GET, HEALTH_PATH) => self.health(),
            (&Method::GET, METRICS_PATH) => match render_metrics() {
                Some(text) => listener::bytes_response(
                    StatusCode::OK,
                    "text/plain; version=0.0.4",
                    text.into(),
                ),
                None => listener::text_response(StatusCode::NOT_FOUND, "metrics are disabled\n"),
            },
            _ => listener::not_found(),
        }
    }
}
