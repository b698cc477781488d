//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use tokio::net::TcpListener;

use gateway_admission::config::{GatewayConfig, RouteConfig};
use gateway_admission::discovery::InMemoryRegistry;
use gateway_admission::http::{build_router, AppState};

/// Upstream that echoes the request path and counts hits.
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicU32>,
}

impl MockUpstream {
    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Start an upstream on an ephemeral port that answers every request with `status`.
pub async fn start_upstream(status: StatusCode) -> MockUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU32::new(0));

    let app = Router::new()
        .fallback(echo)
        .with_state((hits.clone(), status));

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockUpstream { addr, hits }
}

async fn echo(
    State((hits, status)): State<(Arc<AtomicU32>, StatusCode)>,
    request: Request<Body>,
) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    Response::builder()
        .status(status)
        .body(Body::from(request.uri().path().to_string()))
        .unwrap()
}

/// A local port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Config with one `/api` route to `service`, no limits and metrics off.
pub fn base_config(service: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.observability.metrics_enabled = false;
    config.timeouts.request_secs = 5;
    config.timeouts.connect_secs = 1;
    config.routes.push(RouteConfig {
        name: service.to_string(),
        host: None,
        path_prefix: "/api".to_string(),
        service: service.to_string(),
        strip_prefix: false,
        priority: 0,
    });
    config
}

pub fn state(config: GatewayConfig) -> AppState {
    let registry = Arc::new(InMemoryRegistry::new(config.registry.ttl));
    AppState::new(config, registry)
}

pub fn gateway(config: GatewayConfig) -> Router {
    build_router(state(config))
}

pub fn get(path: &str, client_ip: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("x-forwarded-for", client_ip)
        .body(Body::empty())
        .unwrap()
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn text_body(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
