// tests/proxy_tests.rs
use async_trait::async_trait;
use hyper::header::{HeaderValue, HOST};
use hyper::StatusCode;
use proxy_core::cache::{CacheError, CacheManager, MemoryCache};
use proxy_core::proxy::ProxyResponse;
use proxy_core::circuit_breaker::CircuitState;
use proxy_core::config::ProxyConfig;
use proxy_core::proxy::{Backend, ProxyError, ProxyManager, ProxyRequest};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

fn test_config() -> ProxyConfig {
    ProxyConfig {
        max_retries: 2,
        retry_delay_ms: 5,
        retry_backoff: false,
        request_timeout_ms: 2_000,
        health_check_timeout_ms: 500,
        connection_timeout_ms: 500,
        ..ProxyConfig::default()
    }
}

fn get(path: &str) -> ProxyRequest {
    ProxyRequest::get(path.parse().unwrap())
}

/// A local address with nothing listening on it.
fn refused_url() -> Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap()
}

fn url_of(server: &mockito::ServerGuard) -> Url {
    Url::parse(&server.url()).unwrap()
}

#[tokio::test]
async fn cached_get_skips_the_backend() {
    let mut server = mockito::Server::new_async().await;
    let items = server
        .mock("GET", "/items")
        .with_status(200)
        .with_body("[1,2,3]")
        .expect(1)
        .create_async()
        .await;

    let config = ProxyConfig {
        cache_enabled: true,
        ..test_config()
    };
    let manager = ProxyManager::new(config).with_cache(Arc::new(MemoryCache::new()));
    manager.add_backend(Backend::new("a", url_of(&server))).unwrap();

    let first = manager.forward(&get("/items")).await.unwrap();
    let second = manager.forward(&get("/items")).await.unwrap();
    assert_eq!(first.body, second.body);
    assert_eq!(second.status, StatusCode::OK);

    items.assert_async().await;
    let metrics = manager.metrics();
    assert_eq!(metrics.totals.cache_misses, 1);
    assert_eq!(metrics.totals.cache_hits, 1);
    assert_eq!(metrics.totals.total_requests, 1);
    assert_eq!(metrics.backends["a"].cache_hits, 1);
}

/// Cache whose store is always down.
struct UnavailableCache;

#[async_trait]
impl CacheManager for UnavailableCache {
    async fn get(&self, _key: &str) -> Result<Option<ProxyResponse>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: ProxyResponse, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn cache_errors_fall_through_to_backend() {
    let mut server = mockito::Server::new_async().await;
    let items = server
        .mock("GET", "/items")
        .with_status(200)
        .with_body("fresh")
        .expect(2)
        .create_async()
        .await;

    let config = ProxyConfig {
        cache_enabled: true,
        ..test_config()
    };
    let manager = ProxyManager::new(config).with_cache(Arc::new(UnavailableCache));
    manager.add_backend(Backend::new("a", url_of(&server))).unwrap();

    for _ in 0..2 {
        let response = manager.forward(&get("/items")).await.unwrap();
        assert_eq!(&response.body[..], b"fresh");
    }

    items.assert_async().await;
    let metrics = manager.metrics();
    assert_eq!(metrics.totals.cache_misses, 2);
    assert_eq!(metrics.totals.cache_hits, 0);
    assert_eq!(metrics.totals.successful_requests, 2);
}

#[tokio::test]
async fn backend_sees_its_own_host() {
    let mut server = mockito::Server::new_async().await;
    let backend_host = server
        .mock("GET", "/x")
        .match_header("host", server.host_with_port().as_str())
        .with_status(200)
        .with_body("backend-host")
        .create_async()
        .await;
    server
        .mock("GET", "/x")
        .match_header("host", "gateway.local")
        .with_status(200)
        .with_body("gateway-host")
        .create_async()
        .await;

    let manager = ProxyManager::new(test_config());
    manager.add_backend(Backend::new("a", url_of(&server))).unwrap();

    let mut request = get("/x");
    request
        .headers
        .insert(HOST, HeaderValue::from_static("gateway.local"));
    let response = manager.forward(&request).await.unwrap();

    assert_eq!(&response.body[..], b"backend-host");
    backend_host.assert_async().await;
}

#[tokio::test]
async fn non_get_and_non_200_are_not_cached() {
    let mut server = mockito::Server::new_async().await;
    let post = server
        .mock("POST", "/items")
        .with_status(200)
        .expect(2)
        .create_async()
        .await;
    let missing = server
        .mock("GET", "/missing")
        .with_status(404)
        .expect(2)
        .create_async()
        .await;

    let config = ProxyConfig {
        cache_enabled: true,
        ..test_config()
    };
    let manager = ProxyManager::new(config).with_cache(Arc::new(MemoryCache::new()));
    manager.add_backend(Backend::new("a", url_of(&server))).unwrap();

    let post_request = ProxyRequest::new(hyper::Method::POST, "/items".parse().unwrap())
        .with_body("{}");
    for _ in 0..2 {
        manager.forward(&post_request).await.unwrap();
        let response = manager.forward(&get("/missing")).await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    post.assert_async().await;
    missing.assert_async().await;
    assert_eq!(manager.metrics().totals.cache_hits, 0);
}

#[tokio::test]
async fn server_errors_are_retried_then_reported() {
    let mut server = mockito::Server::new_async().await;
    let failing = server
        .mock("GET", "/boom")
        .with_status(500)
        .with_body("kaboom")
        .expect(3)
        .create_async()
        .await;

    let config = ProxyConfig {
        circuit_breaker_enabled: false,
        ..test_config()
    };
    let manager = ProxyManager::new(config);
    manager.add_backend(Backend::new("a", url_of(&server))).unwrap();

    let err = manager.forward(&get("/boom")).await.unwrap_err();
    assert!(matches!(err, ProxyError::RetriesExhausted { attempts: 3, .. }));
    assert!(matches!(
        err.root_cause(),
        ProxyError::BackendStatus { status, .. } if *status == StatusCode::INTERNAL_SERVER_ERROR
    ));
    let response = err.response().expect("5xx response is kept");
    assert_eq!(&response.body[..], b"kaboom");

    failing.assert_async().await;
    let metrics = manager.metrics();
    assert_eq!(metrics.totals.total_retries, 2);
    assert_eq!(metrics.totals.failed_requests, 3);
    assert_eq!(metrics.totals.successful_requests, 0);

    let health = &manager.health_status()["a"];
    assert!(!health.is_healthy);
    assert_eq!(health.consecutive_fails, 3);
    assert!(health.error_message.as_deref().unwrap().contains("500"));
}

#[tokio::test]
async fn unreachable_backend_exhausts_retry_budget() {
    let config = ProxyConfig {
        max_retries: 3,
        circuit_breaker_enabled: false,
        ..test_config()
    };
    let manager = ProxyManager::new(config);
    manager.add_backend(Backend::new("dead", refused_url())).unwrap();

    let err = manager.forward(&get("/")).await.unwrap_err();
    assert!(matches!(err.root_cause(), ProxyError::Transport { .. }));
    assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

    let metrics = manager.metrics();
    assert_eq!(metrics.totals.total_retries, 3);
    assert_eq!(metrics.backends["dead"].failed_requests, 4);

    // now unhealthy, so the next call fails fast without retrying
    let err = manager.forward(&get("/")).await.unwrap_err();
    assert!(matches!(err, ProxyError::NoAvailableBackends));
    assert_eq!(manager.metrics().totals.total_retries, 3);
}

#[tokio::test]
async fn open_circuit_skips_network_call() {
    let config = ProxyConfig {
        max_retries: 4,
        circuit_breaker_threshold: 2,
        ..test_config()
    };
    let manager = ProxyManager::new(config);
    manager.add_backend(Backend::new("dead", refused_url())).unwrap();

    let err = manager.forward(&get("/")).await.unwrap_err();
    assert!(matches!(err.root_cause(), ProxyError::CircuitOpen(id) if id == "dead"));

    // two real attempts open the circuit, the remaining three are skipped
    let metrics = manager.metrics();
    assert_eq!(metrics.backends["dead"].total_requests, 2);
    assert_eq!(metrics.totals.total_retries, 4);
    assert_eq!(manager.circuit_breaker().state("dead"), CircuitState::Open);
}

#[tokio::test]
async fn client_errors_count_as_success() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/nope")
        .with_status(404)
        .create_async()
        .await;

    let config = ProxyConfig {
        circuit_breaker_threshold: 1,
        ..test_config()
    };
    let manager = ProxyManager::new(config);
    manager.add_backend(Backend::new("a", url_of(&server))).unwrap();

    let response = manager.forward(&get("/nope")).await.unwrap();
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(!manager.circuit_breaker().is_open("a"));
    assert!(manager.health_status()["a"].is_healthy);
    assert_eq!(manager.metrics().totals.successful_requests, 1);
}

#[tokio::test]
async fn request_timeout_is_enforced() {
    // accepts connections but never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let config = ProxyConfig {
        max_retries: 0,
        request_timeout_ms: 100,
        ..test_config()
    };
    let manager = ProxyManager::new(config);
    let url = Url::parse(&format!("http://{}", addr)).unwrap();
    manager.add_backend(Backend::new("slow", url)).unwrap();

    let err = manager.forward(&get("/")).await.unwrap_err();
    assert!(matches!(err.root_cause(), ProxyError::Timeout { .. }));
    assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(manager.metrics().totals.total_retries, 0);

    silent.abort();
}

#[tokio::test]
async fn removed_backend_is_never_selected() {
    let mut keep = mockito::Server::new_async().await;
    let kept = keep
        .mock("GET", "/")
        .with_status(200)
        .expect(4)
        .create_async()
        .await;
    let mut gone = mockito::Server::new_async().await;
    let removed = gone
        .mock("GET", "/")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let manager = ProxyManager::new(test_config());
    manager.add_backend(Backend::new("keep", url_of(&keep))).unwrap();
    manager.add_backend(Backend::new("gone", url_of(&gone))).unwrap();
    manager.remove_backend("gone").unwrap();

    assert!(matches!(
        manager.get_backend("gone"),
        Err(ProxyError::BackendNotFound(_))
    ));
    assert!(manager.list_backends().iter().all(|b| b.id != "gone"));
    assert!(!manager.health_status().contains_key("gone"));

    for _ in 0..4 {
        manager.forward(&get("/")).await.unwrap();
    }
    kept.assert_async().await;
    removed.assert_async().await;
}

#[tokio::test]
async fn round_robin_spreads_requests() {
    let mut one = mockito::Server::new_async().await;
    let first = one.mock("GET", "/").with_status(200).expect(3).create_async().await;
    let mut two = mockito::Server::new_async().await;
    let second = two.mock("GET", "/").with_status(200).expect(3).create_async().await;

    let manager = ProxyManager::new(test_config());
    manager.add_backend(Backend::new("one", url_of(&one))).unwrap();
    manager.add_backend(Backend::new("two", url_of(&two))).unwrap();

    for _ in 0..6 {
        manager.forward(&get("/")).await.unwrap();
    }
    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn health_check_restores_backend() {
    let mut server = mockito::Server::new_async().await;
    let flaky = server
        .mock("GET", "/data")
        .with_status(503)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", "/health")
        .with_status(200)
        .create_async()
        .await;

    let config = ProxyConfig {
        max_retries: 0,
        ..test_config()
    };
    let manager = ProxyManager::new(config);
    manager.add_backend(Backend::new("a", url_of(&server))).unwrap();

    assert!(manager.forward(&get("/data")).await.is_err());
    assert!(!manager.health_status()["a"].is_healthy);
    assert!(matches!(
        manager.forward(&get("/data")).await,
        Err(ProxyError::NoAvailableBackends)
    ));
    flaky.assert_async().await;
    flaky.remove_async().await;

    let results = manager.health_check().await;
    assert_eq!(results.len(), 1);
    assert!(results[0].healthy);
    assert!(manager.health_status()["a"].is_healthy);

    server
        .mock("GET", "/data")
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;
    let response = manager.forward(&get("/data")).await.unwrap();
    assert_eq!(&response.body[..], b"ok");
}

#[tokio::test]
async fn failing_backend_is_isolated_end_to_end() {
    let mut healthy = mockito::Server::new_async().await;
    let served = healthy
        .mock("GET", "/work")
        .with_status(200)
        .with_body("done")
        .expect(10)
        .create_async()
        .await;
    healthy
        .mock("GET", "/health")
        .with_status(200)
        .create_async()
        .await;

    let config = ProxyConfig {
        circuit_breaker_threshold: 1,
        ..test_config()
    };
    let manager = ProxyManager::new(config);
    manager.add_backend(Backend::new("a", url_of(&healthy))).unwrap();
    manager.add_backend(Backend::new("b", refused_url())).unwrap();

    for _ in 0..10 {
        let response = manager.forward(&get("/work")).await.unwrap();
        assert_eq!(&response.body[..], b"done");
    }

    served.assert_async().await;
    assert_eq!(manager.circuit_breaker().state("b"), CircuitState::Open);
    let metrics = manager.metrics();
    assert_eq!(metrics.backends["b"].failed_requests, 1);
    assert_eq!(metrics.backends["a"].successful_requests, 10);
    assert_eq!(metrics.totals.total_retries, 1);

    manager.health_check().await;
    let health = manager.health_status();
    assert!(health["a"].is_healthy);
    assert!(!health["b"].is_healthy);
}

#[tokio::test]
async fn concurrent_forwards_keep_exact_counts() {
    let mut server = mockito::Server::new_async().await;
    let hits = server
        .mock("GET", "/")
        .with_status(200)
        .expect(20)
        .create_async()
        .await;

    let manager = Arc::new(ProxyManager::new(test_config()));
    manager.add_backend(Backend::new("a", url_of(&server))).unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move {
                let request = get("/");
                manager.forward(&request).await
            })
        })
        .collect();
    for task in futures::future::join_all(tasks).await {
        task.unwrap().unwrap();
    }

    hits.assert_async().await;
    let metrics = manager.metrics();
    assert_eq!(metrics.totals.total_requests, 20);
    assert_eq!(metrics.totals.successful_requests, 20);

    manager.reset_metrics();
    assert_eq!(manager.metrics().totals.total_requests, 0);
}

#[tokio::test]
async fn shutdown_stops_health_loop_and_closes_pool() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/health").with_status(200).create_async().await;
    server.mock("GET", "/").with_status(200).create_async().await;

    let config = ProxyConfig {
        health_check_interval_ms: 20,
        ..test_config()
    };
    let manager = ProxyManager::new(config);
    manager.add_backend(Backend::new("a", url_of(&server))).unwrap();
    manager.start_health_checker();

    manager.forward(&get("/")).await.unwrap();
    assert_eq!(manager.connection_pool().stats().total_connections, 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    tokio::time::timeout(Duration::from_secs(2), manager.shutdown())
        .await
        .expect("shutdown should join the health loop");

    assert_eq!(manager.connection_pool().stats().total_connections, 0);
    assert!(manager.health_status()["a"].last_check.is_some());
}
