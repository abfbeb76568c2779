// src/load_balancer/round_robin.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::{Backend, ProxyError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Rotates over whatever candidate list it is handed. The list is filtered
/// per call, so the rotation follows the eligible set rather than a fixed ring.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LoadBalancer for RoundRobinBalancer {
    async fn select_backend(&self, candidates: &[Arc<Backend>]) -> Result<Arc<Backend>, ProxyError> {
        if candidates.is_empty() {
            return Err(ProxyError::NoAvailableBackends);
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Ok(candidates[index].clone())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use url::Url;

    fn backends(n: usize) -> Vec<Arc<Backend>> {
        (0..n)
            .map(|i| {
                let url = Url::parse(&format!("http://127.0.0.1:{}", 8000 + i)).unwrap();
                Arc::new(Backend::new(format!("b{}", i), url))
            })
            .collect()
    }

    #[tokio::test]
    async fn empty_candidates_is_an_error() {
        let lb = RoundRobinBalancer::new();
        let err = lb.select_backend(&[]).await.unwrap_err();
        assert!(matches!(err, ProxyError::NoAvailableBackends));
    }

    #[tokio::test]
    async fn rotates_in_order() {
        let lb = RoundRobinBalancer::new();
        let pool = backends(3);

        let mut picked = Vec::new();
        for _ in 0..6 {
            picked.push(lb.select_backend(&pool).await.unwrap().id.clone());
        }
        assert_eq!(picked, vec!["b0", "b1", "b2", "b0", "b1", "b2"]);
    }

    #[tokio::test]
    async fn shrinking_candidate_set_can_repeat() {
        let lb = RoundRobinBalancer::new();
        let pool = backends(3);

        let first = lb.select_backend(&pool).await.unwrap();
        assert_eq!(first.id, "b0");
        // b0 dropped out of the eligible set, counter is now 1
        let second = lb.select_backend(&pool[1..2]).await.unwrap();
        assert_eq!(second.id, "b1");
        let third = lb.select_backend(&pool[1..2]).await.unwrap();
        assert_eq!(third.id, "b1");
    }

    proptest! {
        #[test]
        fn visits_every_backend_once_per_cycle(n in 1usize..16, offset in 0usize..64) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let lb = RoundRobinBalancer::new();
            let pool = backends(n);

            runtime.block_on(async {
                // start from an arbitrary counter position
                for _ in 0..offset {
                    lb.select_backend(&pool).await.unwrap();
                }
                let mut seen = HashSet::new();
                for _ in 0..n {
                    let backend = lb.select_backend(&pool).await.unwrap();
                    prop_assert!(seen.insert(backend.id.clone()));
                }
                prop_assert_eq!(seen.len(), n);
                Ok(())
            })?;
        }
    }
}
