// src/main.rs
use anyhow::{Context, Result};
use proxy_core::{
    cache::MemoryCache,
    config,
    metrics::MetricsRegistry,
    proxy::{Backend, ProxyManager},
    server::{start_admin_server, RequestHandler, ServerBuilder},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("proxy_core=info".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;

    // Initialize metrics
    let metrics_registry = Arc::new(MetricsRegistry::new()?);

    let manager = ProxyManager::new(config.proxy.clone())
        .with_cache(Arc::new(MemoryCache::new()))
        .with_collector(metrics_registry.collector());

    for backend in config.backends.clone() {
        let id = backend.id.clone();
        manager
            .add_backend(Backend::from(backend))
            .with_context(|| format!("Failed to register backend {}", id))?;
    }
    let manager = Arc::new(manager);

    manager.start_health_checker();

    if config.metrics.enabled {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_admin_server(
            metrics_addr,
            metrics_registry.clone(),
            manager.clone(),
            config.metrics.path.clone(),
        )?;
    }

    let handler = RequestHandler::new(manager.clone());

    info!(
        "Starting proxy on {} with {} backends",
        config.listen,
        manager.list_backends().len()
    );

    let served = ServerBuilder::new(config.listen)
        .with_handler(handler)
        .serve(shutdown_signal())
        .await;

    manager.shutdown().await;
    if let Err(e) = &served {
        error!("Server error: {:#}", e);
    }
    served
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
