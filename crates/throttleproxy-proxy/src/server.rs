//! Proxy HTTP server
//!
//! Accepts HTTP/1.1 connections and dispatches each request to the
//! [`Forwarder`] until the shutdown token is cancelled.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::body::{self, ProxyBody};
use crate::forward::Forwarder;
use crate::route::Route;
use crate::ProxyError;

/// HTTP server fronting a [`Forwarder`].
pub struct ProxyServer {
    forwarder: Arc<Forwarder>,
    addr: SocketAddr,
}

impl ProxyServer {
    /// Creates a new `ProxyServer`.
    ///
    /// # Arguments
    /// * `forwarder` - Shared request handler
    /// * `listen` - Address to bind, e.g. `"0.0.0.0:3000"`
    pub fn new(forwarder: Arc<Forwarder>, listen: &str) -> anyhow::Result<Self> {
        let addr: SocketAddr = listen.parse()?;
        Ok(Self { forwarder, addr })
    }

    /// Binds the configured address and serves until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Serves on an already-bound listener until `shutdown` is cancelled.
    pub async fn run_with_listener(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        info!(addr = %listener.local_addr()?, "Proxy listening");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let forwarder = Arc::clone(&self.forwarder);

                    tokio::spawn(async move {
                        let service = service_fn(move |req| handle(req, Arc::clone(&forwarder)));

                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            debug!(peer = %peer, error = %e, "Proxy connection closed with error");
                        }
                    });
                }
                _ = shutdown.cancelled() => {
                    info!("Proxy server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

fn text_response(status: StatusCode, body: impl Into<String>) -> Response<ProxyBody> {
    let mut response = Response::new(body::full(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn error_response(err: &ProxyError) -> Response<ProxyBody> {
    let mut response = text_response(err.status_code(), err.to_string());
    if matches!(err, ProxyError::MethodNotAllowed) {
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET"));
    }
    response
}

/// Handle a single HTTP request.
async fn handle(
    req: Request<Incoming>,
    forwarder: Arc<Forwarder>,
) -> Result<Response<ProxyBody>, Infallible> {
    // request bodies are never read
    let (parts, _) = req.into_parts();
    let req = Request::from_parts(parts, ());
    Ok(dispatch(&req, &forwarder)
        .await
        .unwrap_or_else(|e| error_response(&e)))
}

async fn dispatch(
    req: &Request<()>,
    forwarder: &Forwarder,
) -> Result<Response<ProxyBody>, ProxyError> {
    if req.method() != Method::GET {
        return Err(ProxyError::MethodNotAllowed);
    }

    match Route::parse(req.uri().path(), req.uri().query())? {
        Route::SetRate { key, rate } => {
            let change = forwarder.set_rate(&key, &rate)?;
            Ok(text_response(StatusCode::OK, change.to_string()))
        }
        Route::Forward { key, target } => forwarder.forward(&key, &target).await,
    }
}
