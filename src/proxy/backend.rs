// src/proxy/backend.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::config::BackendConfig;

/// An upstream server requests may be forwarded to.
#[derive(Debug, Clone, Serialize)]
pub struct Backend {
    pub id: String,
    pub url: Url,
    pub weight: u32,
    pub is_active: bool,
    /// Overrides the manager-wide health check path when set.
    pub health_check_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Backend {
    pub fn new(id: impl Into<String>, url: Url) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            url,
            weight: 1,
            is_active: true,
            health_check_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_health_check_path(mut self, path: impl Into<String>) -> Self {
        self.health_check_path = Some(path.into());
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }

    /// Path probed by the health checker, falling back to `default`.
    pub fn health_path<'a>(&'a self, default: &'a str) -> &'a str {
        self.health_check_path.as_deref().unwrap_or(default)
    }
}

impl From<BackendConfig> for Backend {
    fn from(config: BackendConfig) -> Self {
        let mut backend = Backend::new(config.id, config.url)
            .with_weight(config.weight)
            .with_active(config.active);
        backend.health_check_path = config.health_check_path;
        backend
    }
}

/// Health record kept for every registered backend. Updated by active
/// probes and by the outcome of every forwarded request.
#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    pub backend_id: String,
    pub is_healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub consecutive_fails: u32,
    pub response_time: Duration,
    pub error_message: Option<String>,
}

impl BackendHealth {
    pub fn new(backend_id: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            is_healthy: true,
            last_check: None,
            last_success: None,
            last_failure: None,
            consecutive_fails: 0,
            response_time: Duration::ZERO,
            error_message: None,
        }
    }

    pub fn record_success(&mut self, response_time: Duration) {
        let now = Utc::now();
        self.is_healthy = true;
        self.last_check = Some(now);
        self.last_success = Some(now);
        self.consecutive_fails = 0;
        self.response_time = response_time;
        self.error_message = None;
    }

    pub fn record_failure(&mut self, response_time: Duration, error: impl Into<String>) {
        let now = Utc::now();
        self.is_healthy = false;
        self.last_check = Some(now);
        self.last_failure = Some(now);
        self.consecutive_fails = self.consecutive_fails.saturating_add(1);
        self.response_time = response_time;
        self.error_message = Some(error.into());
    }
}
