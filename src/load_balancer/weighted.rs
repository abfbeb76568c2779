// src/load_balancer/weighted.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::{Backend, ProxyError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Smooth weighted round robin (the nginx variant): every pick raises each
/// candidate's current weight by its configured weight, takes the largest
/// and lowers it by the total.
#[derive(Debug, Default)]
pub struct WeightedRoundRobinBalancer {
    current: Mutex<HashMap<String, i64>>,
}

impl WeightedRoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LoadBalancer for WeightedRoundRobinBalancer {
    async fn select_backend(&self, candidates: &[Arc<Backend>]) -> Result<Arc<Backend>, ProxyError> {
        if candidates.is_empty() {
            return Err(ProxyError::NoAvailableBackends);
        }

        let mut current = self.current.lock().await;
        current.retain(|id, _| candidates.iter().any(|b| &b.id == id));

        let mut total = 0i64;
        let mut best: Option<(usize, i64)> = None;
        for (index, backend) in candidates.iter().enumerate() {
            let weight = i64::from(backend.weight.max(1));
            total += weight;

            let cw = current.entry(backend.id.clone()).or_insert(0);
            *cw += weight;
            if best.map_or(true, |(_, w)| *cw > w) {
                best = Some((index, *cw));
            }
        }

        let (index, _) = best.ok_or(ProxyError::NoAvailableBackends)?;
        let selected = candidates[index].clone();
        if let Some(cw) = current.get_mut(&selected.id) {
            *cw -= total;
        }
        Ok(selected)
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}
