// src/proxy/pool.rs
use crate::config::ProxyConfig;
use dashmap::DashMap;
use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_tls::HttpsConnector;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// HTTP client kept per backend. Connection reuse happens inside its pool.
pub type BackendClient = Client<HttpsConnector<HttpConnector>, Body>;

const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

pub trait ConnectionPool: Send + Sync {
    /// Cached client for `backend_id`, created on first use.
    fn get_connection(&self, backend_id: &str) -> Arc<BackendClient>;

    /// Connections go back to the transport pool when a response is
    /// dropped, so there is nothing to check back in.
    fn release_connection(&self, _backend_id: &str) {}

    /// Drops every cached client, closing their idle connections.
    fn close(&self);

    fn stats(&self) -> PoolStats;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub total_connections: usize,
    pub per_backend: HashMap<String, usize>,
}

pub struct HttpConnectionPool {
    clients: DashMap<String, Arc<BackendClient>>,
    max_idle_per_host: usize,
    idle_timeout: Duration,
    connect_timeout: Duration,
}

impl HttpConnectionPool {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            clients: DashMap::new(),
            max_idle_per_host: config.max_connections_per_backend,
            idle_timeout: config.idle_conn_timeout(),
            connect_timeout: config.connection_timeout(),
        }
    }

    fn build_client(&self) -> BackendClient {
        let mut http = HttpConnector::new();
        http.set_connect_timeout(Some(self.connect_timeout));
        http.set_keepalive(Some(TCP_KEEPALIVE));
        http.set_nodelay(true);
        http.enforce_http(false);

        Client::builder()
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_idle_timeout(self.idle_timeout)
            .build(HttpsConnector::new_with_connector(http))
    }
}

impl ConnectionPool for HttpConnectionPool {
    fn get_connection(&self, backend_id: &str) -> Arc<BackendClient> {
        if let Some(client) = self.clients.get(backend_id) {
            return client.clone();
        }

        // entry() takes the shard write lock and re-checks before inserting
        self.clients
            .entry(backend_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(backend = %backend_id, "Creating pooled client");
                Arc::new(self.build_client())
            })
            .clone()
    }

    fn close(&self) {
        let count = self.clients.len();
        self.clients.clear();
        tracing::info!("Connection pool closed ({} clients dropped)", count);
    }

    fn stats(&self) -> PoolStats {
        let per_backend: HashMap<String, usize> = self
            .clients
            .iter()
            .map(|entry| (entry.key().clone(), 1))
            .collect();

        PoolStats {
            total_connections: per_backend.len(),
            per_backend,
        }
    }
}
