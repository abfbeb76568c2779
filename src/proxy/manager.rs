// src/proxy/manager.rs
use super::backend::{Backend, BackendHealth};
use super::error::ProxyError;
use super::pool::{ConnectionPool, HttpConnectionPool};
use super::registry::BackendRegistry;
use super::request::{ProxyRequest, ProxyResponse};
use crate::cache::CacheManager;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerManager};
use crate::config::ProxyConfig;
use crate::health::{HealthCheckResult, HealthChecker};
use crate::load_balancer::{create_load_balancer, LoadBalancer};
use crate::metrics::{MetricsCollector, MetricsStore, ProxyMetrics};
use crate::retry::{is_failure_status, RetryPolicy};
use arc_swap::ArcSwap;
use hyper::{Body, Method, Request, StatusCode, Uri};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::{Position, Url};

/// The swappable strategies. Replaced as a whole so one `forward` call
/// always works against a consistent set.
#[derive(Clone)]
struct Strategies {
    load_balancer: Arc<dyn LoadBalancer>,
    circuit_breaker: Arc<dyn CircuitBreaker>,
    connection_pool: Arc<dyn ConnectionPool>,
}

/// Owns the backend registry and drives the retrying forward pipeline.
pub struct ProxyManager {
    config: ProxyConfig,
    registry: Arc<BackendRegistry>,
    strategies: ArcSwap<Strategies>,
    retry: RetryPolicy,
    cache: Option<Arc<dyn CacheManager>>,
    stats: MetricsStore,
    collector: Option<Arc<MetricsCollector>>,
    health_checker: Arc<HealthChecker>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyManager {
    pub fn new(config: ProxyConfig) -> Self {
        let registry = Arc::new(BackendRegistry::new());
        let strategies = Strategies {
            load_balancer: create_load_balancer(config.load_balancer),
            circuit_breaker: Arc::new(CircuitBreakerManager::from_config(&config)),
            connection_pool: Arc::new(HttpConnectionPool::new(&config)),
        };
        let health_checker = Arc::new(HealthChecker::new(&config, registry.clone(), None));

        Self {
            retry: RetryPolicy::from_config(&config),
            config,
            registry,
            strategies: ArcSwap::from_pointee(strategies),
            cache: None,
            stats: MetricsStore::new(),
            collector: None,
            health_checker,
            health_task: Mutex::new(None),
        }
    }

    /// Response cache used for GET requests when caching is enabled.
    pub fn with_cache(mut self, cache: Arc<dyn CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Mirror outcomes into a Prometheus collector.
    pub fn with_collector(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.health_checker = Arc::new(HealthChecker::new(
            &self.config,
            self.registry.clone(),
            Some(collector.clone()),
        ));
        self.collector = Some(collector);
        self
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    // ── Backend registry ────────────────────────────────────────────

    pub fn add_backend(&self, backend: Backend) -> Result<(), ProxyError> {
        let backend = self.registry.add(backend)?;
        self.stats.register_backend(&backend.id);
        if let Some(collector) = &self.collector {
            collector.update_backend_health(&backend.id, true);
            collector.update_backend_counts(self.registry.healthy_count(), self.registry.len());
        }
        Ok(())
    }

    pub fn remove_backend(&self, id: &str) -> Result<(), ProxyError> {
        self.registry.remove(id)?;
        if let Some(collector) = &self.collector {
            collector.remove_backend(id);
            collector.update_backend_counts(self.registry.healthy_count(), self.registry.len());
        }
        Ok(())
    }

    pub fn get_backend(&self, id: &str) -> Result<Arc<Backend>, ProxyError> {
        self.registry.get(id)
    }

    pub fn list_backends(&self) -> Vec<Arc<Backend>> {
        self.registry.list()
    }

    // ── Strategies ──────────────────────────────────────────────────

    pub fn set_load_balancer(&self, load_balancer: Arc<dyn LoadBalancer>) {
        info!("Load balancer set to {}", load_balancer.name());
        self.strategies.rcu(|current| Strategies {
            load_balancer: load_balancer.clone(),
            ..(**current).clone()
        });
    }

    pub fn load_balancer(&self) -> Arc<dyn LoadBalancer> {
        self.strategies.load().load_balancer.clone()
    }

    pub fn set_circuit_breaker(&self, circuit_breaker: Arc<dyn CircuitBreaker>) {
        self.strategies.rcu(|current| Strategies {
            circuit_breaker: circuit_breaker.clone(),
            ..(**current).clone()
        });
    }

    pub fn circuit_breaker(&self) -> Arc<dyn CircuitBreaker> {
        self.strategies.load().circuit_breaker.clone()
    }

    /// Installs a new pool and closes the idle connections of the old one.
    pub fn set_connection_pool(&self, connection_pool: Arc<dyn ConnectionPool>) {
        let previous = self.strategies.rcu(|current| Strategies {
            connection_pool: connection_pool.clone(),
            ..(**current).clone()
        });
        if !Arc::ptr_eq(&previous.connection_pool, &connection_pool) {
            previous.connection_pool.close();
        }
    }

    pub fn connection_pool(&self) -> Arc<dyn ConnectionPool> {
        self.strategies.load().connection_pool.clone()
    }

    // ── Health ──────────────────────────────────────────────────────

    /// Runs one probe round synchronously.
    pub async fn health_check(&self) -> Vec<HealthCheckResult> {
        self.health_checker.clone().check_all_backends().await
    }

    pub fn health_status(&self) -> HashMap<String, BackendHealth> {
        self.registry.health_status()
    }

    /// Spawns the periodic health loop if enabled and not already running.
    pub fn start_health_checker(&self) {
        if !self.config.health_check_enabled {
            info!("Health checking is disabled");
            return;
        }

        let mut task = self.health_task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_none() {
            *task = Some(tokio::spawn(self.health_checker.clone().start()));
        }
    }

    /// Stops the health loop, waits for it and closes pooled connections.
    pub async fn shutdown(&self) {
        self.health_checker.shutdown();
        let task = self
            .health_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Health checker task failed: {}", e);
            }
        }
        self.connection_pool().close();
        info!("Proxy manager shut down");
    }

    // ── Metrics ─────────────────────────────────────────────────────

    pub fn metrics(&self) -> ProxyMetrics {
        self.stats.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.stats.reset();
        info!("Proxy metrics reset");
    }

    // ── Forwarding ──────────────────────────────────────────────────

    /// Forwards `request` to an eligible backend, retrying on failure.
    ///
    /// The candidate set is computed once up front; if it is empty the call
    /// fails immediately without consuming the retry budget.
    pub async fn forward(&self, request: &ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let strategies = self.strategies.load_full();

        let candidates = self.registry.candidates(strategies.circuit_breaker.as_ref());
        if candidates.is_empty() {
            warn!(
                method = %request.method,
                uri = %request.uri,
                "No available backends"
            );
            return Err(ProxyError::NoAvailableBackends);
        }

        let use_cache = self.config.cache_enabled && request.method == Method::GET;
        let max_attempts = self.retry.max_attempts();
        let mut last_err = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                self.stats.record_retry();
                if let Some(collector) = &self.collector {
                    collector.record_retry();
                }
                let delay = self.retry.delay_for(attempt);
                debug!(attempt, ?delay, "Retrying request");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            let backend = match strategies.load_balancer.select_backend(&candidates).await {
                Ok(backend) => backend,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };

            if strategies.circuit_breaker.is_open(&backend.id) {
                debug!(backend = %backend.id, attempt, "Circuit open, skipping backend");
                last_err = Some(ProxyError::CircuitOpen(backend.id.clone()));
                continue;
            }

            let cache_key = use_cache.then(|| cache_key(&backend.id, request));
            if let Some(key) = &cache_key {
                if let Some(response) = self.cache_lookup(&backend.id, key).await {
                    return Ok(response);
                }
            }

            let started = Instant::now();
            let result = self
                .forward_to_backend(strategies.connection_pool.as_ref(), &backend, request)
                .await;
            let elapsed = started.elapsed();
            strategies.connection_pool.release_connection(&backend.id);

            match result {
                Ok(response) => {
                    self.record_success(&strategies, &backend, elapsed);
                    if let Some(key) = cache_key {
                        if response.status == StatusCode::OK {
                            self.cache_store(key, &response).await;
                        }
                    }
                    return Ok(response);
                }
                Err(err) => {
                    self.record_failure(&strategies, &backend, elapsed, &err);
                    last_err = Some(err);
                }
            }
        }

        let source = last_err.unwrap_or(ProxyError::NoAvailableBackends);
        warn!(attempts = max_attempts, error = %source.chain(), "Request failed after retries");
        Err(ProxyError::RetriesExhausted {
            attempts: max_attempts,
            source: Box::new(source),
        })
    }

    async fn forward_to_backend(
        &self,
        pool: &dyn ConnectionPool,
        backend: &Backend,
        request: &ProxyRequest,
    ) -> Result<ProxyResponse, ProxyError> {
        let uri = backend_uri(&backend.url, request)?;

        let mut outbound = Request::new(Body::from(request.body.clone()));
        *outbound.method_mut() = request.method.clone();
        *outbound.uri_mut() = uri;
        *outbound.headers_mut() = request.headers.clone();
        // hyper fills Host from the target uri when it is absent
        outbound.headers_mut().remove(hyper::header::HOST);

        let client = pool.get_connection(&backend.id);
        let request_timeout = self.config.request_timeout();

        let call = async {
            let response = client.request(outbound).await?;
            let (parts, body) = response.into_parts();
            let body = hyper::body::to_bytes(body).await?;
            Ok::<_, hyper::Error>(ProxyResponse {
                status: parts.status,
                headers: parts.headers,
                body,
            })
        };

        let response = match tokio::time::timeout(request_timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => {
                return Err(ProxyError::Transport {
                    backend: backend.id.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(ProxyError::Timeout {
                    backend: backend.id.clone(),
                    after: request_timeout,
                })
            }
        };

        if is_failure_status(response.status) {
            return Err(ProxyError::BackendStatus {
                backend: backend.id.clone(),
                status: response.status,
                response: Box::new(response),
            });
        }
        Ok(response)
    }

    fn record_success(&self, strategies: &Strategies, backend: &Backend, elapsed: Duration) {
        strategies.circuit_breaker.record_success(&backend.id);
        strategies
            .load_balancer
            .update_backend(&backend.id, true, elapsed);
        self.registry
            .update_health(&backend.id, |health| health.record_success(elapsed));
        self.stats.record_attempt(&backend.id, true, elapsed);

        if let Some(collector) = &self.collector {
            collector.record_attempt(&backend.id, true, elapsed);
            collector.update_backend_health(&backend.id, true);
            collector.update_circuit_breaker_state(
                &backend.id,
                strategies.circuit_breaker.state(&backend.id),
            );
        }
        debug!(backend = %backend.id, ?elapsed, "Request forwarded");
    }

    fn record_failure(
        &self,
        strategies: &Strategies,
        backend: &Backend,
        elapsed: Duration,
        err: &ProxyError,
    ) {
        let message = err.chain();
        strategies.circuit_breaker.record_failure(&backend.id);
        strategies
            .load_balancer
            .update_backend(&backend.id, false, elapsed);
        self.registry
            .update_health(&backend.id, |health| health.record_failure(elapsed, message.clone()));
        self.stats.record_attempt(&backend.id, false, elapsed);

        if let Some(collector) = &self.collector {
            collector.record_attempt(&backend.id, false, elapsed);
            collector.update_backend_health(&backend.id, false);
            collector.update_circuit_breaker_state(
                &backend.id,
                strategies.circuit_breaker.state(&backend.id),
            );
        }
        warn!(backend = %backend.id, ?elapsed, error = %message, "Backend request failed");
    }

    async fn cache_lookup(&self, backend_id: &str, key: &str) -> Option<ProxyResponse> {
        let cache = self.cache.as_ref()?;
        let hit = match cache.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                debug!(key, error = %e, "Cache lookup failed, treating as miss");
                None
            }
        };

        match &hit {
            Some(_) => self.stats.record_cache_hit(backend_id),
            None => self.stats.record_cache_miss(backend_id),
        }
        if let Some(collector) = &self.collector {
            collector.record_cache_lookup(hit.is_some());
        }
        if hit.is_some() {
            debug!(key, "Served from cache");
        }
        hit
    }

    async fn cache_store(&self, key: String, response: &ProxyResponse) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = cache.set(&key, response.clone(), self.config.cache_ttl()).await {
            debug!(key = %key, error = %e, "Failed to cache response");
        }
    }
}

pub(crate) fn cache_key(backend_id: &str, request: &ProxyRequest) -> String {
    format!(
        "proxy:{}:{}:{}",
        backend_id,
        request.method,
        request.request_uri()
    )
}

/// Target URI on `base`: scheme and authority from the backend, the
/// backend's base path joined with the request's path, the request's query.
fn backend_uri(base: &Url, request: &ProxyRequest) -> Result<Uri, ProxyError> {
    let authority = &base[Position::BeforeHost..Position::AfterPort];
    let prefix = base.path().trim_end_matches('/');
    let path = request.uri.path();

    let mut target = format!("{}://{}{}", base.scheme(), authority, prefix);
    if !path.starts_with('/') {
        target.push('/');
    }
    target.push_str(path);
    if let Some(query) = request.uri.query() {
        target.push('?');
        target.push_str(query);
    }

    target
        .parse()
        .map_err(|e| ProxyError::InvalidRequest(format!("cannot build target uri {}: {}", target, e)))
}
