// src/cache/mod.rs
mod memory;

pub use memory::MemoryCache;

use crate::proxy::ProxyResponse;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache rejected key {key}: {reason}")]
    Rejected { key: String, reason: String },
}

/// Response cache consulted by the forward pipeline. Errors are treated
/// as misses by the caller.
#[async_trait]
pub trait CacheManager: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<ProxyResponse>, CacheError>;

    async fn set(&self, key: &str, value: ProxyResponse, ttl: Duration) -> Result<(), CacheError>;
}
