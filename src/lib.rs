// src/lib.rs
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod health;
pub mod load_balancer;
pub mod metrics;
pub mod proxy;
pub mod retry;
pub mod server;

pub use config::{Config, ProxyConfig};
pub use proxy::{Backend, ProxyError, ProxyManager, ProxyRequest, ProxyResponse};
