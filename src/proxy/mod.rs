// src/proxy/mod.rs
mod backend;
mod error;
mod manager;
mod pool;
mod registry;
mod request;

pub use backend::{Backend, BackendHealth};
pub use error::ProxyError;
pub use manager::ProxyManager;
pub use pool::{BackendClient, ConnectionPool, HttpConnectionPool, PoolStats};
pub use registry::BackendRegistry;
pub use request::{ProxyRequest, ProxyResponse};
