// src/health/checker.rs
use crate::config::ProxyConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::{Backend, BackendRegistry};
use anyhow::Result;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use url::Url;

/// Periodically probes every registered backend and records the outcome in
/// the registry's health map.
pub struct HealthChecker {
    registry: Arc<BackendRegistry>,
    client: Client,
    interval: Duration,
    timeout: Duration,
    default_path: String,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct HealthCheckResult {
    pub backend_id: String,
    pub healthy: bool,
    pub response_time: Duration,
    pub error: Option<String>,
}

impl HealthChecker {
    pub fn new(
        config: &ProxyConfig,
        registry: Arc<BackendRegistry>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let client = Client::builder()
            .timeout(config.health_check_timeout())
            .build()
            .expect("Failed to create HTTP client");

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Self {
            registry,
            client,
            interval: config.health_check_interval(),
            timeout: config.health_check_timeout(),
            default_path: config.health_check_path.clone(),
            metrics,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub async fn start(self: Arc<Self>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!("Starting health checker with interval: {:?}", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.clone().check_all_backends().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Probes every registered backend concurrently and waits for all of them.
    pub async fn check_all_backends(self: Arc<Self>) -> Vec<HealthCheckResult> {
        let backends = self.registry.list();
        let mut tasks = Vec::with_capacity(backends.len());

        for backend in backends {
            let checker = self.clone();
            tasks.push(tokio::spawn(async move { checker.check_backend(backend).await }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for joined in futures::future::join_all(tasks).await {
            match joined {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => error!("Health check error: {}", e),
                Err(e) => error!("Task join error: {}", e),
            }
        }

        let healthy_count = results.iter().filter(|r| r.healthy).count();
        if let Some(metrics) = &self.metrics {
            metrics.update_backend_counts(self.registry.healthy_count(), self.registry.len());
        }

        info!(
            "Health check complete: {} healthy, {} unhealthy",
            healthy_count,
            results.len() - healthy_count
        );
        results
    }

    async fn check_backend(&self, backend: Arc<Backend>) -> Result<HealthCheckResult> {
        let url = probe_url(&backend.url, backend.health_path(&self.default_path));
        let was_healthy = self.registry.is_healthy(&backend.id);

        let start = Instant::now();
        let result = timeout(self.timeout, self.client.get(url.as_str()).send()).await;
        let response_time = start.elapsed();

        let (healthy, error) = match result {
            Ok(Ok(response)) => {
                let status = response.status();
                if status.is_success() {
                    (true, None)
                } else {
                    (false, Some(format!("HTTP {}", status)))
                }
            }
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (false, Some("Request timeout".to_string())),
        };

        let recorded = self.registry.update_health(&backend.id, |health| match &error {
            None => health.record_success(response_time),
            Some(message) => health.record_failure(response_time, message.clone()),
        });
        if !recorded {
            debug!("Backend {} was removed during its health check", backend.id);
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(&backend.id, healthy);
        }

        if healthy && !was_healthy {
            info!("Backend {} is healthy again", backend.id);
        } else if !healthy && was_healthy {
            warn!("Backend {} is now unhealthy: {:?}", backend.id, error);
        } else {
            debug!("Backend {} health check: healthy={}", backend.id, healthy);
        }

        Ok(HealthCheckResult {
            backend_id: backend.id.clone(),
            healthy,
            response_time,
            error,
        })
    }
}

/// Health path appended to the backend's base path, the same way forwarded
/// requests are.
fn probe_url(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(None);
    url
}
