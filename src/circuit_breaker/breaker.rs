// src/circuit_breaker/breaker.rs

use crate::config::ProxyConfig;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failing, rejecting requests
    HalfOpen, // Testing if service recovered
}

/// Per-backend failure tracking that decides whether traffic may be sent.
pub trait CircuitBreaker: Send + Sync {
    /// Whether requests to `backend_id` must be rejected right now.
    fn is_open(&self, backend_id: &str) -> bool;

    fn record_success(&self, backend_id: &str);

    fn record_failure(&self, backend_id: &str);

    /// Forget everything known about `backend_id`.
    fn reset(&self, backend_id: &str);

    fn state(&self, backend_id: &str) -> CircuitState;
}

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    last_success_time: Option<Instant>,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            last_success_time: None,
        }
    }
}

/// Consecutive-failure circuit breaker, one state machine per backend.
///
/// ```text
/// Closed   -> Open:     failure_count reaches the threshold
/// Open     -> HalfOpen: first is_open() call after the timeout elapsed
/// HalfOpen -> Closed:   any success
/// HalfOpen -> Open:     any failure
/// ```
pub struct CircuitBreakerManager {
    breakers: DashMap<String, BreakerEntry>,
    enabled: bool,
    threshold: u32,
    timeout: Duration,
}

impl CircuitBreakerManager {
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            breakers: DashMap::new(),
            enabled: true,
            threshold: threshold.max(1),
            timeout,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        let mut breaker = Self::new(
            config.circuit_breaker_threshold,
            config.circuit_breaker_timeout(),
        );
        breaker.enabled = config.circuit_breaker_enabled;
        breaker
    }

    pub fn disabled() -> Self {
        let mut breaker = Self::new(1, Duration::ZERO);
        breaker.enabled = false;
        breaker
    }

    /// Consecutive failures recorded for a backend since its last success.
    pub fn failure_count(&self, backend_id: &str) -> u32 {
        self.breakers
            .get(backend_id)
            .map(|entry| entry.failure_count)
            .unwrap_or(0)
    }

    pub fn last_success(&self, backend_id: &str) -> Option<Instant> {
        self.breakers
            .get(backend_id)
            .and_then(|entry| entry.last_success_time)
    }
}

impl CircuitBreaker for CircuitBreakerManager {
    fn is_open(&self, backend_id: &str) -> bool {
        if !self.enabled {
            return false;
        }

        // get_mut holds the shard write lock, so the Open -> HalfOpen
        // transition happens at most once per timeout window.
        let Some(mut entry) = self.breakers.get_mut(backend_id) else {
            return false;
        };

        let state = entry.state;
        match state {
            CircuitState::Closed | CircuitState::HalfOpen => false,
            CircuitState::Open => {
                let expired = entry
                    .last_failure_time
                    .map_or(true, |at| at.elapsed() > self.timeout);
                if expired {
                    entry.state = CircuitState::HalfOpen;
                    tracing::info!(backend = %backend_id, "Circuit breaker transitioned to half-open");
                }
                !expired
            }
        }
    }

    fn record_success(&self, backend_id: &str) {
        let mut entry = self
            .breakers
            .entry(backend_id.to_string())
            .or_insert_with(BreakerEntry::new);

        entry.failure_count = 0;
        entry.last_success_time = Some(Instant::now());

        if entry.state != CircuitState::Closed {
            entry.state = CircuitState::Closed;
            tracing::info!(backend = %backend_id, "Circuit breaker closed after successful recovery");
        }
    }

    fn record_failure(&self, backend_id: &str) {
        let mut entry = self
            .breakers
            .entry(backend_id.to_string())
            .or_insert_with(BreakerEntry::new);

        entry.failure_count = entry.failure_count.saturating_add(1);
        entry.last_failure_time = Some(Instant::now());

        let (state, failures) = (entry.state, entry.failure_count);
        match state {
            CircuitState::Closed if failures >= self.threshold => {
                entry.state = CircuitState::Open;
                tracing::warn!(
                    backend = %backend_id,
                    failures,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                tracing::warn!(backend = %backend_id, "Circuit breaker reopened after failed probe");
            }
            _ => {}
        }
    }

    fn reset(&self, backend_id: &str) {
        if self.breakers.remove(backend_id).is_some() {
            tracing::debug!(backend = %backend_id, "Circuit breaker reset");
        }
    }

    fn state(&self, backend_id: &str) -> CircuitState {
        self.breakers
            .get(backend_id)
            .map(|entry| entry.state)
            .unwrap_or(CircuitState::Closed)
    }
}
