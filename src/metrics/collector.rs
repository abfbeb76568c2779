// src/metrics/collector.rs
use crate::circuit_breaker::CircuitState;
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    /// Prometheus text exposition of everything registered.
    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

/// Prometheus mirror of the proxy's outcome bookkeeping.
pub struct MetricsCollector {
    // Attempt metrics
    pub attempts_total: IntCounterVec,
    pub attempt_duration_seconds: HistogramVec,
    pub retries_total: IntCounter,
    pub cache_lookups_total: IntCounterVec,

    // Backend state
    pub backend_health_status: IntGaugeVec,
    pub circuit_breaker_state: IntGaugeVec,

    // System metrics
    pub healthy_backends: IntGauge,
    pub total_backends: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let attempts_total = IntCounterVec::new(
            Opts::new("proxy_backend_attempts_total", "Forward attempts per backend"),
            &["backend", "outcome"],
        )?;
        registry.register(Box::new(attempts_total.clone()))?;

        let attempt_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "proxy_backend_attempt_duration_seconds",
                "Duration of forward attempts in seconds",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(attempt_duration_seconds.clone()))?;

        let retries_total = IntCounter::new("proxy_retries_total", "Retries performed")?;
        registry.register(Box::new(retries_total.clone()))?;

        let cache_lookups_total = IntCounterVec::new(
            Opts::new("proxy_cache_lookups_total", "Response cache lookups"),
            &["result"],
        )?;
        registry.register(Box::new(cache_lookups_total.clone()))?;

        let backend_health_status = IntGaugeVec::new(
            Opts::new(
                "proxy_backend_health_status",
                "Backend health status (1=healthy, 0=unhealthy)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_health_status.clone()))?;

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "proxy_circuit_breaker_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let healthy_backends =
            IntGauge::new("proxy_healthy_backends", "Number of healthy backends")?;
        registry.register(Box::new(healthy_backends.clone()))?;

        let total_backends = IntGauge::new("proxy_total_backends", "Number of registered backends")?;
        registry.register(Box::new(total_backends.clone()))?;

        Ok(Self {
            attempts_total,
            attempt_duration_seconds,
            retries_total,
            cache_lookups_total,
            backend_health_status,
            circuit_breaker_state,
            healthy_backends,
            total_backends,
        })
    }

    pub fn record_attempt(&self, backend: &str, success: bool, duration: Duration) {
        let outcome = if success { "success" } else { "failure" };
        self.attempts_total
            .with_label_values(&[backend, outcome])
            .inc();

        self.attempt_duration_seconds
            .with_label_values(&[backend])
            .observe(duration.as_secs_f64());
    }

    pub fn record_retry(&self) {
        self.retries_total.inc();
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups_total.with_label_values(&[result]).inc();
    }

    pub fn update_backend_health(&self, backend: &str, healthy: bool) {
        let value = if healthy { 1 } else { 0 };
        self.backend_health_status
            .with_label_values(&[backend])
            .set(value);
    }

    pub fn update_circuit_breaker_state(&self, backend: &str, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        };

        self.circuit_breaker_state
            .with_label_values(&[backend])
            .set(value);
    }

    pub fn update_backend_counts(&self, healthy: usize, total: usize) {
        self.healthy_backends.set(healthy as i64);
        self.total_backends.set(total as i64);
    }

    /// Drops the per-backend gauges of a removed backend.
    pub fn remove_backend(&self, backend: &str) {
        let _ = self.backend_health_status.remove_label_values(&[backend]);
        let _ = self.circuit_breaker_state.remove_label_values(&[backend]);
    }
}
