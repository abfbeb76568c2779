// src/load_balancer/algorithm.rs
use crate::proxy::{Backend, ProxyError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Pick one backend out of the currently eligible candidates.
    async fn select_backend(&self, candidates: &[Arc<Backend>]) -> Result<Arc<Backend>, ProxyError>;

    /// Outcome feedback for adaptive strategies.
    fn update_backend(&self, _backend_id: &str, _success: bool, _response_time: Duration) {}

    fn name(&self) -> &'static str;
}
