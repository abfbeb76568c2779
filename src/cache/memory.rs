// src/cache/memory.rs
use super::{CacheError, CacheManager};
use crate::proxy::ProxyResponse;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

struct Entry {
    response: ProxyResponse,
    expires_at: Instant,
}

/// In-process TTL cache. Expired entries are dropped lazily on lookup or
/// by `purge_expired`.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    max_entries: Option<usize>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse new keys once `max_entries` live entries are stored.
    pub fn with_capacity_limit(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: Some(max_entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }
}

#[async_trait]
impl CacheManager for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<ProxyResponse>, CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.response.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: ProxyResponse, ttl: Duration) -> Result<(), CacheError> {
        if let Some(limit) = self.max_entries {
            if self.entries.len() >= limit && !self.entries.contains_key(key) {
                self.purge_expired();
                if self.entries.len() >= limit {
                    return Err(CacheError::Rejected {
                        key: key.to_string(),
                        reason: format!("capacity of {} entries reached", limit),
                    });
                }
            }
        }

        self.entries.insert(
            key.to_string(),
            Entry {
                response: value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}
