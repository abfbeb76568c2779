// src/metrics/stats.rs
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time view of a set of request counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_retries: u64,
    pub total_response_time: Duration,
    pub average_response_time: Duration,
}

pub type BackendMetrics = RequestStats;

/// Snapshot returned by `ProxyManager::metrics`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProxyMetrics {
    #[serde(flatten)]
    pub totals: RequestStats,
    pub backends: HashMap<String, BackendMetrics>,
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    total_retries: AtomicU64,
    total_response_time_us: AtomicU64,
}

impl Counters {
    fn record_attempt(&self, success: bool, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(response_time.as_micros()).unwrap_or(u64::MAX);
        self.total_response_time_us.fetch_add(micros, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RequestStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_response_time =
            Duration::from_micros(self.total_response_time_us.load(Ordering::Relaxed));
        let average_response_time = match total_requests {
            0 => Duration::ZERO,
            n => total_response_time / u32::try_from(n).unwrap_or(u32::MAX),
        };

        RequestStats {
            total_requests,
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            total_response_time,
            average_response_time,
        }
    }

    fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.successful_requests,
            &self.failed_requests,
            &self.cache_hits,
            &self.cache_misses,
            &self.total_retries,
            &self.total_response_time_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Process-wide and per-backend counters owned by one proxy manager.
#[derive(Debug, Default)]
pub struct MetricsStore {
    totals: Counters,
    backends: DashMap<String, Counters>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self, backend_id: &str, success: bool, response_time: Duration) {
        self.totals.record_attempt(success, response_time);
        self.backend(backend_id, |c| c.record_attempt(success, response_time));
    }

    pub fn record_cache_hit(&self, backend_id: &str) {
        self.totals.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.backend(backend_id, |c| {
            c.cache_hits.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_cache_miss(&self, backend_id: &str) {
        self.totals.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.backend(backend_id, |c| {
            c.cache_misses.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_retry(&self) {
        self.totals.total_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Makes sure a backend shows up in snapshots before it sees traffic.
    pub fn register_backend(&self, backend_id: &str) {
        self.backends.entry(backend_id.to_string()).or_default();
    }

    pub fn snapshot(&self) -> ProxyMetrics {
        ProxyMetrics {
            totals: self.totals.snapshot(),
            backends: self
                .backends
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().snapshot()))
                .collect(),
        }
    }

    pub fn reset(&self) {
        self.totals.reset();
        for entry in self.backends.iter() {
            entry.value().reset();
        }
    }

    // read-locked fast path, entry() only on first use
    fn backend(&self, backend_id: &str, f: impl FnOnce(&Counters)) {
        if let Some(counters) = self.backends.get(backend_id) {
            f(counters.value());
            return;
        }
        let counters = self.backends.entry(backend_id.to_string()).or_default();
        f(counters.value());
    }
}
