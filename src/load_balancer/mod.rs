// src/load_balancer/mod.rs
mod algorithm;
mod round_robin;
mod weighted;

pub use algorithm::LoadBalancer; // trait
pub use round_robin::RoundRobinBalancer;
pub use weighted::WeightedRoundRobinBalancer;
pub use crate::config::LoadBalancerAlgorithm;

use std::sync::Arc;

pub fn create_load_balancer(algorithm: LoadBalancerAlgorithm) -> Arc<dyn LoadBalancer> {
    match algorithm {
        LoadBalancerAlgorithm::RoundRobin => Arc::new(RoundRobinBalancer::new()),
        LoadBalancerAlgorithm::WeightedRoundRobin => Arc::new(WeightedRoundRobinBalancer::new()),
    }
}
