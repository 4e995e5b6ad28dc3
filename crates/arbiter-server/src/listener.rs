//! Accept loop shared by the authorization and admin listeners.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Response type produced by every endpoint.
pub type HttpResponse = Response<Full<Bytes>>;

/// Something that answers HTTP requests on one listener.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// Listener name used in logs.
    fn name(&self) -> &'static str;

    /// Answers one request.
    async fn handle(&self, request: Request<Incoming>) -> HttpResponse;
}

/// Binds a listener.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is invalid or in use.
pub async fn bind(addr: &str) -> ServerResult<TcpListener> {
    let socket_addr: SocketAddr = addr
        .parse()
        .map_err(|e| ServerError::bind(addr, format!("invalid address: {e}")))?;
    TcpListener::bind(socket_addr)
        .await
        .map_err(|e| ServerError::bind(addr, e))
}

/// Serves `endpoint` on `listener` until `shutdown` fires, then waits up to
/// `drain_timeout` for open connections to finish.
pub async fn serve(
    listener: TcpListener,
    endpoint: Arc<dyn Endpoint>,
    shutdown: ShutdownSignal,
    drain_timeout: Duration,
) {
    let name = endpoint.name();
    match listener.local_addr() {
        Ok(addr) => info!(listener = name, %addr, "listening"),
        Err(e) => warn!(listener = name, error = %e, "listening on unknown address"),
    }

    let tracker = ConnectionTracker::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    let endpoint = Arc::clone(&endpoint);
                    let shutdown = shutdown.clone();
                    let guard = tracker.track();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, endpoint, shutdown).await {
                            debug!(listener = name, %remote_addr, error = %e, "connection error");
                        }
                        drop(guard);
                    });
                }
                Err(e) => error!(listener = name, error = %e, "failed to accept connection"),
            },
            () = shutdown.recv() => break,
        }
    }

    drop(listener);
    info!(
        listener = name,
        active = tracker.active(),
        timeout_ms = u64::try_from(drain_timeout.as_millis()).unwrap_or(u64::MAX),
        "draining connections"
    );
    if tracker.drain(drain_timeout).await {
        info!(listener = name, "listener stopped");
    } else {
        warn!(
            listener = name,
            active = tracker.active(),
            "drain timeout reached, abandoning open connections"
        );
    }
}

async fn serve_connection(
    stream: TcpStream,
    endpoint: Arc<dyn Endpoint>,
    shutdown: ShutdownSignal,
) -> Result<(), hyper::Error> {
    let service = service_fn(move |request: Request<Incoming>| {
        let endpoint = Arc::clone(&endpoint);
        async move { Ok::<_, Infallible>(endpoint.handle(request).await) }
    });

    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => result,
        () = shutdown.recv() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    }
}

/// Why a request body could not be read.
#[derive(Debug)]
pub(crate) enum BodyError {
    TimedOut,
    Read(String),
}

/// Reads a request body of at most `limit` bytes within `timeout`.
pub(crate) async fn read_body(
    request: Request<Incoming>,
    limit: usize,
    timeout: Duration,
) -> Result<Bytes, BodyError> {
    let body = Limited::new(request.into_body(), limit);
    match tokio::time::timeout(timeout, body.collect()).await {
        Ok(Ok(collected)) => Ok(collected.to_bytes()),
        Ok(Err(e)) => Err(BodyError::Read(e.to_string())),
        Err(_) => Err(BodyError::TimedOut),
    }
}

pub(crate) fn bytes_response(status: StatusCode, content_type: &str, body: Bytes) -> HttpResponse {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Full::new(body.clone()))
        .unwrap_or_else(|_| {
            let mut response = Response::new(Full::new(body));
            *response.status_mut() = status;
            response
        })
}

pub(crate) fn text_response(status: StatusCode, body: impl Into<String>) -> HttpResponse {
    bytes_response(status, "text/plain; charset=utf-8", Bytes::from(body.into()))
}

pub(crate) fn json_response(status: StatusCode, value: &impl Serialize) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => bytes_response(status, "application/json", Bytes::from(body)),
        Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("unable to encode response: {e}")),
    }
}

pub(crate) fn not_found() -> HttpResponse {
    text_response(StatusCode::NOT_FOUND, "not found\n")
}
