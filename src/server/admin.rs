// src/server/admin.rs
use crate::metrics::MetricsRegistry;
use crate::proxy::ProxyManager;
use anyhow::Result;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

const STATUS_PATH: &str = "/proxy/status";

/// Spawns the metrics/status listener: Prometheus text on `metrics_path`,
/// JSON metrics, health and pool stats on `/proxy/status`.
pub fn start_admin_server(
    addr: SocketAddr,
    registry: Arc<MetricsRegistry>,
    manager: Arc<ProxyManager>,
    metrics_path: String,
) -> Result<()> {
    let metrics_path = Arc::new(metrics_path);
    let service_path = metrics_path.clone();

    let make_service = make_service_fn(move |_| {
        let registry = registry.clone();
        let manager = manager.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let manager = manager.clone();
                let path = path.clone();

                async move { Ok::<_, Infallible>(route(req, &registry, &manager, &path)) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_service);
    info!("Admin server listening on http://{}{}", addr, metrics_path.as_str());

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Admin server error: {}", e);
        }
    });

    Ok(())
}

fn route(
    req: Request<Body>,
    registry: &MetricsRegistry,
    manager: &ProxyManager,
    metrics_path: &str,
) -> Response<Body> {
    if req.method() != Method::GET {
        return plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    }

    match req.uri().path() {
        path if path == metrics_path => {
            let mut response = Response::new(Body::from(registry.gather()));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        STATUS_PATH => status(manager),
        _ => plain(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn status(manager: &ProxyManager) -> Response<Body> {
    let body = json!({
        "load_balancer": manager.load_balancer().name(),
        "backends": manager.list_backends(),
        "health": manager.health_status(),
        "metrics": manager.metrics(),
        "pool": manager.connection_pool().stats(),
    });

    match serde_json::to_vec(&body) {
        Ok(bytes) => {
            let mut response = Response::new(Body::from(bytes));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(e) => {
            error!("Failed to serialise status: {}", e);
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn plain(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}
