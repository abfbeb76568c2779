// src/config/models.rs
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

/// Top-level file configuration for the gateway binary.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.proxy.validate()?;

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.id.is_empty() {
                bail!("backend with url {} has an empty id", backend.url);
            }
            if !seen.insert(backend.id.as_str()) {
                bail!("duplicate backend id: {}", backend.id);
            }
        }

        if self.metrics.enabled && self.metrics.port == self.listen.port() {
            bail!("metrics port {} collides with the listen port", self.metrics.port);
        }
        Ok(())
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// A backend declared in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    pub url: Url,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub health_check_path: Option<String>,
}

fn default_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerAlgorithm {
    RoundRobin,
    WeightedRoundRobin,
}

impl Default for LoadBalancerAlgorithm {
    fn default() -> Self {
        Self::RoundRobin
    }
}

/// Behaviour of the forwarding core. Durations are milliseconds on the wire,
/// read them through the accessor methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff: bool,
    pub request_timeout_ms: u64,

    pub health_check_enabled: bool,
    pub health_check_interval_ms: u64,
    pub health_check_timeout_ms: u64,
    pub health_check_path: String,

    pub circuit_breaker_enabled: bool,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_ms: u64,

    pub max_connections_per_backend: usize,
    pub idle_conn_timeout_ms: u64,
    pub connection_timeout_ms: u64,

    pub cache_enabled: bool,
    pub cache_ttl_ms: u64,

    pub load_balancer: LoadBalancerAlgorithm,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 100,
            retry_backoff: true,
            request_timeout_ms: 30_000,

            health_check_enabled: true,
            health_check_interval_ms: 10_000,
            health_check_timeout_ms: 5_000,
            health_check_path: "/health".to_string(),

            circuit_breaker_enabled: true,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_ms: 60_000,

            max_connections_per_backend: 100,
            idle_conn_timeout_ms: 90_000,
            connection_timeout_ms: 10_000,

            cache_enabled: false,
            cache_ttl_ms: 300_000,

            load_balancer: LoadBalancerAlgorithm::RoundRobin,
        }
    }
}

impl ProxyConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn circuit_breaker_timeout(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_timeout_ms)
    }

    pub fn idle_conn_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_conn_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            bail!("request_timeout_ms must be greater than zero");
        }
        if self.max_connections_per_backend == 0 {
            bail!("max_connections_per_backend must be greater than zero");
        }
        if self.circuit_breaker_enabled && self.circuit_breaker_threshold == 0 {
            bail!("circuit_breaker_threshold must be at least 1 when the breaker is enabled");
        }
        if self.health_check_enabled {
            if self.health_check_interval_ms == 0 {
                bail!("health_check_interval_ms must be greater than zero");
            }
            if self.health_check_timeout_ms == 0 {
                bail!("health_check_timeout_ms must be greater than zero");
            }
            if !self.health_check_path.starts_with('/') {
                bail!(
                    "health_check_path must start with '/', got {:?}",
                    self.health_check_path
                );
            }
        }
        if self.cache_enabled && self.cache_ttl_ms == 0 {
            bail!("cache_ttl_ms must be greater than zero when caching is enabled");
        }
        Ok(())
    }
}
