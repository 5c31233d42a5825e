//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use chat_gateway::config::{GatewayConfig, StoreBackend};
use chat_gateway::{HttpServer, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Start a programmable backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;

                let (status, body) = f().await;
                let reason = StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown");
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// A backend that always answers 200 with `body`.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (200, body.to_string()) }).await
}

/// Fake generative API. Answers per API key; records every key it saw.
#[derive(Clone)]
pub struct MockGenerative {
    pub addr: SocketAddr,
    pub keys_seen: Arc<Mutex<Vec<String>>>,
}

type KeyBehaviour = Arc<dyn Fn(&str) -> (u16, String) + Send + Sync>;

#[derive(Clone)]
struct MockState {
    behaviour: KeyBehaviour,
    keys_seen: Arc<Mutex<Vec<String>>>,
}

pub async fn start_mock_generative<F>(behaviour: F) -> MockGenerative
where
    F: Fn(&str) -> (u16, String) + Send + Sync + 'static,
{
    let keys_seen = Arc::new(Mutex::new(Vec::new()));
    let state = MockState {
        behaviour: Arc::new(behaviour),
        keys_seen: keys_seen.clone(),
    };

    async fn generate(
        State(state): State<MockState>,
        headers: HeaderMap,
    ) -> (StatusCode, String) {
        let key = headers
            .get("x-goog-api-key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        state.keys_seen.lock().unwrap().push(key.clone());
        let (status, body) = (state.behaviour)(&key);
        (StatusCode::from_u16(status).unwrap(), body)
    }

    let app = Router::new()
        .route("/v1beta/models/{action}", post(generate))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockGenerative { addr, keys_seen }
}

/// Successful generateContent payload.
pub fn generated(text: &str) -> (u16, String) {
    let body = serde_json::json!({
        "candidates": [{"content": {"parts": [{"text": text}]}}]
    });
    (200, body.to_string())
}

/// Quota failure as the API reports it.
pub fn quota_exceeded() -> (u16, String) {
    (
        429,
        r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED","message":"Quota exceeded"}}"#
            .to_string(),
    )
}

/// Defaults for tests: in-memory store, no metrics, admin enabled.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.rate_limit.store.backend = StoreBackend::Memory;
    config.observability.metrics_enabled = false;
    config.admin.enabled = true;
    config.admin.api_key = "test-admin-key".into();
    config
}

/// A running gateway on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub config_updates: mpsc::UnboundedSender<GatewayConfig>,
    shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn admin_get(&self, path: &str) -> reqwest::Response {
        client()
            .get(self.url(path))
            .bearer_auth("test-admin-key")
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn spawn_gateway(config: GatewayConfig) -> TestGateway {
    let shutdown = Shutdown::new();
    let (config_updates, updates_rx) = mpsc::unbounded_channel();
    let server = HttpServer::new(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, updates_rx, server_shutdown).await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    TestGateway {
        addr,
        config_updates,
        shutdown,
    }
}

/// Client without pooling so every request opens a fresh connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
