//! HTTP tests against real listeners on ephemeral ports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arbiter_pdp::{
    AdmissionConfig, AuthorizationRequest, CacheConfig, Decision, EngineError, EnrichmentContext,
    EvaluationOutcome, FetchError, Pdp, PdpConfig, PipError, PolicyInformationPoint,
    PolicySnapshot, PolicySource, StaticPolicySource, StatusCode,
};
use arbiter_server::{Server, ServerConfig, ServerResult, ShutdownSignal};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

struct Running {
    authz: SocketAddr,
    admin: SocketAddr,
    shutdown: ShutdownSignal,
    handle: JoinHandle<ServerResult<()>>,
    pdp: Arc<Pdp>,
}

impl Running {
    fn authz_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.authz)
    }

    fn admin_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.admin)
    }

    async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

fn permit_engine() -> Arc<dyn arbiter_pdp::EvaluationEngine> {
    Arc::new(
        |_: &AuthorizationRequest, _: &PolicySnapshot| -> Result<EvaluationOutcome, EngineError> {
            Ok(EvaluationOutcome::new(Decision::Permit, Vec::new(), None))
        },
    )
}

fn config(admission: AdmissionConfig) -> PdpConfig {
    PdpConfig::default()
        .with_entity_id("https://pdp.example.org")
        .with_cache_config(CacheConfig::default().with_startup_gate(5, Duration::from_millis(10)))
        .with_admission_config(admission)
}

async fn start(
    source: Arc<StaticPolicySource>,
    admission: AdmissionConfig,
    pip: Option<Arc<dyn PolicyInformationPoint>>,
) -> Running {
    let mut builder = Pdp::builder()
        .config(config(admission))
        .source(source as Arc<dyn PolicySource>)
        .engine(permit_engine());
    if let Some(pip) = pip {
        builder = builder.pip(pip);
    }
    let pdp = Arc::new(builder.build().unwrap());

    let server_config = ServerConfig::builder()
        .http_addr("127.0.0.1:0")
        .admin_addr("127.0.0.1:0")
        .shutdown_timeout(Duration::from_secs(1))
        .build();
    let bound = Server::new(Arc::clone(&pdp), server_config).bind().await.unwrap();
    let authz = bound.authz_addr().unwrap();
    let admin = bound.admin_addr().unwrap();

    let shutdown = ShutdownSignal::new();
    let handle = tokio::spawn(bound.run(shutdown.clone()));

    Running {
        authz,
        admin,
        shutdown,
        handle,
        pdp,
    }
}

fn loaded_source() -> Arc<StaticPolicySource> {
    Arc::new(StaticPolicySource::new(PolicySnapshot::new("alpha", "1")))
}

fn request_body() -> Value {
    json!({
        "request_id": "req-42",
        "issuer": "pep.example.org",
        "subject": [{"id": "urn:oasis:names:tc:xacml:1.0:subject:subject-id", "values": ["alice"]}],
        "resources": [[{"id": "urn:oasis:names:tc:xacml:1.0:resource:resource-id", "values": ["storage/a"]}]],
        "action": [{"id": "urn:oasis:names:tc:xacml:1.0:action:action-id", "values": ["read"]}]
    })
}

#[tokio::test]
async fn test_authorize_permit() {
    let server = start(loaded_source(), AdmissionConfig::default(), None).await;

    let response = reqwest::Client::new()
        .post(server.authz_url("/authz"))
        .json(&request_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/json");

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["decision"], "Permit");
    assert_eq!(body["in_response_to"], "req-42");
    assert_eq!(body["issuer"], "https://pdp.example.org");
    assert_eq!(body["status"]["code"], StatusCode::Ok.as_urn());

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_request_is_a_fault() {
    let server = start(loaded_source(), AdmissionConfig::default(), None).await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.authz_url("/authz"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["fault"]["code"], StatusCode::SyntaxError.as_urn());

    let status = client
        .get(server.admin_url("/status"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(status.contains("total_request_errors: 1"));
    assert!(status.contains("total_requests: 0"));

    let response = client
        .post(server.authz_url("/authz"))
        .json(&request_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let report = server.pdp.status();
    assert_eq!(report.total_requests, 1);
    assert_eq!(report.total_completed_requests, 1);
    assert_eq!(report.total_request_errors, 1);

    server.stop().await;
}

#[tokio::test]
async fn test_no_policy_answers_indeterminate() {
    let source = Arc::new(StaticPolicySource::unavailable());
    let server = start(source, AdmissionConfig::default(), None).await;

    let body: Value = reqwest::Client::new()
        .post(server.authz_url("/authz"))
        .json(&request_body())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["decision"], "Indeterminate");
    assert_eq!(body["status"]["code"], StatusCode::ProcessingError.as_urn());

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_routes() {
    let server = start(loaded_source(), AdmissionConfig::default(), None).await;
    let client = reqwest::Client::new();

    let response = client.get(server.authz_url("/authz")).send().await.unwrap();
    assert_eq!(response.status(), 404);
    let response = client.get(server.admin_url("/authz")).send().await.unwrap();
    assert_eq!(response.status(), 404);
    let response = client.get(server.authz_url("/reloadPolicy")).send().await.unwrap();
    assert_eq!(response.status(), 404);

    server.stop().await;
}

#[tokio::test]
async fn test_status_page() {
    let server = start(loaded_source(), AdmissionConfig::default(), None).await;

    let text = reqwest::get(server.authz_url("/status"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("service: arbiter"));
    assert!(text.contains("current_policy: alpha"));
    assert!(text.contains("current_policy_version: 1"));

    server.stop().await;
}

#[tokio::test]
async fn test_reload_policy() {
    let source = loaded_source();
    let server = start(Arc::clone(&source), AdmissionConfig::default(), None).await;
    let client = reqwest::Client::new();

    source.set_policy(PolicySnapshot::new("alpha", "2"));
    let response = client.post(server.admin_url("/reloadPolicy")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().contains("version 2"));

    source.set_failure(FetchError::Unavailable("pap down".to_string()));
    let response = client.get(server.admin_url("/reloadPolicy")).send().await.unwrap();
    assert_eq!(response.status(), 503);
    assert!(response.text().await.unwrap().contains("pap down"));

    let current = server.pdp.cache().current().unwrap();
    assert_eq!(current.version(), "2");

    server.stop().await;
}

#[tokio::test]
async fn test_health() {
    let server = start(loaded_source(), AdmissionConfig::default(), None).await;

    let response = reqwest::get(server.admin_url("/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["running"], true);
    assert_eq!(body["policy_loaded"], true);
    assert_eq!(body["policy_set_id"], "alpha");

    server.stop().await;
}

struct SlowPip;

#[async_trait]
impl PolicyInformationPoint for SlowPip {
    fn id(&self) -> &str {
        "slow"
    }

    async fn enrich(&self, _context: &mut EnrichmentContext<'_>) -> Result<(), PipError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_saturation_answers_service_busy() {
    let admission = AdmissionConfig::default()
        .with_max_requests(1)
        .with_queue_capacity(1);
    let server = start(loaded_source(), admission, Some(Arc::new(SlowPip))).await;
    let client = reqwest::Client::new();

    let mut calls = Vec::new();
    for _ in 0..4 {
        let request = client.post(server.authz_url("/authz")).json(&request_body());
        calls.push(tokio::spawn(async move { request.send().await.unwrap() }));
    }

    let mut busy = 0;
    let mut answered = 0;
    for call in calls {
        let response = call.await.unwrap();
        match response.status().as_u16() {
            200 => answered += 1,
            503 => {
                assert_eq!(response.text().await.unwrap(), "service busy\n");
                busy += 1;
            }
            other => panic!("unexpected status {other}"),
        }
    }
    assert!(busy >= 2, "expected at least two rejections, got {busy}");
    assert!(answered >= 1);
    assert_eq!(server.pdp.status().admission_rejections, busy);

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_stops_the_decision_point() {
    let server = start(loaded_source(), AdmissionConfig::default(), None).await;
    let response = reqwest::get(server.admin_url("/health")).await.unwrap();
    assert_eq!(response.status(), 200);

    let pdp = Arc::clone(&server.pdp);
    let authz = server.authz;
    server.stop().await;

    assert!(!pdp.is_running());
    assert!(reqwest::get(format!("http://{authz}/status")).await.is_err());
}
