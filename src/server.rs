//! Metrics Server
//!
//! Minimal HTTP/1 server exposing `GET /metrics`. Every connection is served
//! on its own task; each request to `/metrics` is one scrape.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, Result};
use crate::exporter;

/// Path served by the exporter
pub const METRICS_PATH: &str = "/metrics";

/// Bind the metrics listener
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server on {}: {}", addr, e)))
}

/// Accept connections until `shutdown` resolves
pub async fn serve<F>(
    listener: TcpListener,
    coordinator: Arc<RefreshCoordinator>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let local_addr = listener.local_addr()?;
    info!("Metrics server listening on {}", local_addr);

    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?,
            _ = &mut shutdown => {
                info!("Metrics server shutting down");
                return Ok(());
            }
        };

        let io = TokioIo::new(stream);
        let coordinator = Arc::clone(&coordinator);

        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, Arc::clone(&coordinator)));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error from {}: {}", peer, e);
            }
        });
    }
}

/// Route one request
pub async fn handle(
    req: Request<Incoming>,
    coordinator: Arc<RefreshCoordinator>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    debug!(method = %req.method(), path = req.uri().path(), "request");

    if req.uri().path() != METRICS_PATH {
        return Ok(text_response(StatusCode::NOT_FOUND, "not found"));
    }
    if req.method() != Method::GET {
        let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET"));
        return Ok(response);
    }

    let outcome = coordinator.scrape().await;
    debug!(decision = ?outcome.decision, bytes = outcome.body.len(), "scrape served");

    let mut response = Response::new(Full::new(Bytes::from(outcome.body)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(exporter::CONTENT_TYPE));
    Ok(response)
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}
