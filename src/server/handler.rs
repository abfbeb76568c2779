// src/server/handler.rs
use hyper::header::HeaderValue;
use hyper::{Body, Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::Service;
use tracing::Instrument;
use uuid::Uuid;

use crate::proxy::{ProxyError, ProxyManager, ProxyRequest, ProxyResponse};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Adapts hyper requests to `ProxyManager::forward`.
#[derive(Clone)]
pub struct RequestHandler {
    manager: Arc<ProxyManager>,
    remote_addr: Option<SocketAddr>,
}

impl RequestHandler {
    pub fn new(manager: Arc<ProxyManager>) -> Self {
        Self {
            manager,
            remote_addr: None,
        }
    }

    /// Handler bound to one accepted connection.
    pub fn for_peer(&self, peer: SocketAddr) -> Self {
        Self {
            manager: self.manager.clone(),
            remote_addr: Some(peer),
        }
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "request",
            id = %request_id,
            method = %req.method(),
            uri = %req.uri(),
        );

        let mut response = self.proxy(req).instrument(span).await;
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().entry(REQUEST_ID_HEADER).or_insert(value);
        }
        response
    }

    async fn proxy(&self, req: Request<Body>) -> Response<Body> {
        let (parts, body) = req.into_parts();
        let body = match hyper::body::to_bytes(body).await {
            Ok(body) => body,
            Err(e) => {
                return ProxyError::InvalidRequest(format!("failed to read body: {}", e)).into()
            }
        };

        let request = ProxyRequest {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            remote_addr: self.remote_addr,
        };

        match self.manager.forward(&request).await {
            Ok(response) => into_response(response),
            Err(e) => {
                tracing::error!(error = %e.chain(), "proxy error");
                e.into()
            }
        }
    }
}

fn into_response(proxied: ProxyResponse) -> Response<Body> {
    let mut response = Response::new(Body::from(proxied.body));
    *response.status_mut() = proxied.status;
    *response.headers_mut() = proxied.headers;
    response
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { Ok(handler.handle(req).await) })
    }
}

// The core never sets status codes itself; this is where its errors
// become HTTP answers.
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let status = err.status_code();
        let message = match status.as_u16() {
            503 => "No backend available",
            504 => "Gateway timeout",
            400 => "Bad request",
            _ => "Bad gateway",
        };

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = status;
        response
    }
}
