//! The authorization listener and the combined server.

use std::net::SocketAddr;
use std::sync::Arc;

use arbiter_pdp::{AdmissionError, Pdp};
use arbiter_telemetry::metrics;
use async_trait::async_trait;
use http::{Method, Request, StatusCode};
use hyper::body::Incoming;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::admin::AdminEndpoint;
use crate::codec::{DecodeError, JsonCodec, MessageCodec};
use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::listener::{self, BodyError, Endpoint, HttpResponse};
use crate::shutdown::ShutdownSignal;

/// Path of the authorization endpoint.
pub const AUTHZ_PATH: &str = "/authz";

/// Path of the plain-text status page.
pub const STATUS_PATH: &str = "/status";

/// Answers `POST /authz` and `GET /status`.
pub struct AuthzEndpoint {
    pdp: Arc<Pdp>,
    codec: Arc<dyn MessageCodec>,
    config: ServerConfig,
}

impl std::fmt::Debug for AuthzEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthzEndpoint")
            .field("config", &self.config)
            .field("content_type", &self.codec.content_type())
            .finish_non_exhaustive()
    }
}

impl AuthzEndpoint {
    /// Creates the endpoint.
    pub fn new(pdp: Arc<Pdp>, codec: Arc<dyn MessageCodec>, config: ServerConfig) -> Self {
        Self { pdp, codec, config }
    }

    async fn authorize(&self, request: Request<Incoming>) -> HttpResponse {
        let body = match listener::read_body(
            request,
            self.config.max_body_bytes(),
            self.config.request_timeout(),
        )
        .await
        {
            Ok(body) => body,
            Err(BodyError::TimedOut) => {
                self.count_error("body_timeout");
                return listener::text_response(StatusCode::REQUEST_TIMEOUT, "request body timed out\n");
            }
            Err(BodyError::Read(reason)) => {
                return self.fault(&DecodeError::Malformed(format!("unable to read body: {reason}")));
            }
        };

        let request = match self.codec.decode(&body) {
            Ok(request) => request,
            Err(e) => return self.fault(&e),
        };
        let request_id = request.request_id.clone();

        let result = match tokio::time::timeout(
            self.config.request_timeout(),
            self.pdp.authorize(request),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(AdmissionError::Busy)) => {
                return listener::text_response(StatusCode::SERVICE_UNAVAILABLE, "service busy\n");
            }
            Ok(Err(AdmissionError::Closed)) => {
                return listener::text_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service is not accepting requests\n",
                );
            }
            Err(_) => {
                warn!(request_id = %request_id, "authorization timed out");
                self.count_error("timeout");
                return listener::text_response(StatusCode::GATEWAY_TIMEOUT, "authorization timed out\n");
            }
        };

        match self.codec.encode_result(&result) {
            Ok(body) => listener::bytes_response(StatusCode::OK, self.codec.content_type(), body),
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "failed to encode result");
                self.count_error("encode");
                listener::text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{e}\n"))
            }
        }
    }

    fn fault(&self, error: &DecodeError) -> HttpResponse {
        debug!(error = %error, "rejecting undecodable request");
        self.count_error("decode");
        listener::bytes_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            self.codec.content_type(),
            self.codec.encode_fault(error),
        )
    }

    fn count_error(&self, kind: &str) {
        self.pdp.service_status().record_request_error();
        metrics::record_request_error(kind);
    }
}

#[async_trait]
impl Endpoint for AuthzEndpoint {
    fn name(&self) -> &'static str {
        "authz"
    }

    async fn handle(&self, request: Request<Incoming>) -> HttpResponse {
        debug!(method = %request.method(), path = request.uri().path(), "authz request");
        match (request.method(), request.uri().path()) {
            (&Method::POST, AUTHZ_PATH) => self.authorize(request).await,
            (&Method::GET, STATUS_PATH) => {
                listener::text_response(StatusCode::OK, self.pdp.status().to_string())
            }
            _ => listener::not_found(),
        }
    }
}

/// The authorization and admin listeners around one [`Pdp`].
///
/// # Example
///
/// ```ignore
/// let server = Server::new(pdp, ServerConfig::default());
/// server.run(ShutdownSignal::with_os_signals()).await?;
/// ```
pub struct Server {
    pdp: Arc<Pdp>,
    codec: Arc<dyn MessageCodec>,
    config: ServerConfig,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("pdp", &self.pdp)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a server using the JSON codec signed with the PDP's entity id.
    pub fn new(pdp: Arc<Pdp>, config: ServerConfig) -> Self {
        let codec = Arc::new(JsonCodec::new(pdp.config().entity_id.clone()));
        Self { pdp, codec, config }
    }

    /// Replaces the wire codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// The served decision point.
    pub fn pdp(&self) -> &Arc<Pdp> {
        &self.pdp
    }

    /// Listener configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds both listeners without serving.
    ///
    /// # Errors
    ///
    /// Returns a bind error for either address.
    pub async fn bind(self) -> ServerResult<BoundServer> {
        let authz = listener::bind(self.config.http_addr()).await?;
        let admin = listener::bind(self.config.admin_addr()).await?;
        Ok(BoundServer {
            server: self,
            authz,
            admin,
        })
    }

    /// Binds, starts the decision point and serves until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener cannot be bound or the decision point
    /// fails to start.
    pub async fn run(self, shutdown: ShutdownSignal) -> ServerResult<()> {
        self.bind().await?.run(shutdown).await
    }
}

/// A [`Server`] whose listeners are bound.
#[derive(Debug)]
pub struct BoundServer {
    server: Server,
    authz: TcpListener,
    admin: TcpListener,
}

impl BoundServer {
    /// Address of the authorization listener.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket address cannot be read.
    pub fn authz_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.authz.local_addr()?)
    }

    /// Address of the admin listener.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket address cannot be read.
    pub fn admin_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.admin.local_addr()?)
    }

    /// Starts the decision point and serves until `shutdown` fires, then
    /// drains both listeners and stops the decision point.
    ///
    /// # Errors
    ///
    /// Returns an error if the decision point fails to start.
    pub async fn run(self, shutdown: ShutdownSignal) -> ServerResult<()> {
        let Self { server, authz, admin } = self;
        let Server { pdp, codec, config } = server;

        pdp.start().await?;

        let drain = config.shutdown_timeout();
        let admin_endpoint: Arc<dyn Endpoint> = Arc::new(AdminEndpoint::new(Arc::clone(&pdp)));
        let authz_endpoint: Arc<dyn Endpoint> =
            Arc::new(AuthzEndpoint::new(Arc::clone(&pdp), codec, config));

        tokio::join!(
            listener::serve(authz, authz_endpoint, shutdown.clone(), drain),
            listener::serve(admin, admin_endpoint, shutdown, drain),
        );

        pdp.shutdown().await;
        info!("server stopped");
        Ok(())
    }
}
