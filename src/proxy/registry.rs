// src/proxy/registry.rs
use super::backend::{Backend, BackendHealth};
use super::error::ProxyError;
use crate::circuit_breaker::CircuitBreaker;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Registered backends and their health records.
#[derive(Default)]
pub struct BackendRegistry {
    backends: DashMap<String, Arc<Backend>>,
    health: DashMap<String, BackendHealth>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, mut backend: Backend) -> Result<Arc<Backend>, ProxyError> {
        if backend.id.trim().is_empty() {
            return Err(ProxyError::InvalidBackend("backend id is empty".to_string()));
        }
        if !matches!(backend.url.scheme(), "http" | "https") {
            return Err(ProxyError::InvalidBackend(format!(
                "backend {} has unsupported scheme {:?}",
                backend.id,
                backend.url.scheme()
            )));
        }
        if backend.url.host_str().map_or(true, str::is_empty) {
            return Err(ProxyError::InvalidBackend(format!(
                "backend {} url has no host",
                backend.id
            )));
        }

        if backend.weight == 0 {
            backend.weight = 1;
        }
        let now = Utc::now();
        backend.created_at = now;
        backend.updated_at = now;

        match self.backends.entry(backend.id.clone()) {
            Entry::Occupied(_) => Err(ProxyError::BackendExists(backend.id)),
            Entry::Vacant(slot) => {
                // health first, so a visible backend always has a record
                self.health
                    .insert(backend.id.clone(), BackendHealth::new(backend.id.clone()));
                let backend = Arc::new(backend);
                slot.insert(backend.clone());
                tracing::info!(backend = %backend.id, url = %backend.url, "Added backend");
                Ok(backend)
            }
        }
    }

    pub fn remove(&self, id: &str) -> Result<Arc<Backend>, ProxyError> {
        let (_, backend) = self
            .backends
            .remove(id)
            .ok_or_else(|| ProxyError::BackendNotFound(id.to_string()))?;
        self.health.remove(id);

        tracing::info!(backend = %id, "Removed backend");
        Ok(backend)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Backend>, ProxyError> {
        self.backends
            .get(id)
            .map(|b| b.value().clone())
            .ok_or_else(|| ProxyError::BackendNotFound(id.to_string()))
    }

    /// Snapshot of every backend, ordered by id.
    pub fn list(&self) -> Vec<Arc<Backend>> {
        let mut backends: Vec<Arc<Backend>> =
            self.backends.iter().map(|entry| entry.value().clone()).collect();
        backends.sort_by(|a, b| a.id.cmp(&b.id));
        backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Backends eligible for traffic: active, circuit not open and healthy
    /// (or without a health record).
    pub fn candidates(&self, breaker: &dyn CircuitBreaker) -> Vec<Arc<Backend>> {
        self.list()
            .into_iter()
            .filter(|backend| backend.is_active)
            .filter(|backend| !breaker.is_open(&backend.id))
            .filter(|backend| self.is_healthy(&backend.id))
            .collect()
    }

    pub fn is_healthy(&self, id: &str) -> bool {
        self.health.get(id).map_or(true, |h| h.is_healthy)
    }

    /// Applies `update` to the health record of `id`. Records of removed
    /// backends are not recreated.
    pub fn update_health(&self, id: &str, update: impl FnOnce(&mut BackendHealth)) -> bool {
        match self.health.get_mut(id) {
            Some(mut health) => {
                update(health.value_mut());
                true
            }
            None => false,
        }
    }

    pub fn health(&self, id: &str) -> Option<BackendHealth> {
        self.health.get(id).map(|h| h.value().clone())
    }

    pub fn health_status(&self) -> HashMap<String, BackendHealth> {
        self.health
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn healthy_count(&self) -> usize {
        self.health.iter().filter(|entry| entry.is_healthy).count()
    }
}
