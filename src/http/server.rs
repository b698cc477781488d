//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the gateway handler
//! - Wire up middleware (tracing, request ID, timeout, rate limiting)
//! - Dispatch requests: route → breaker → discovery → upstream
//! - Report upstream outcomes back into the breaker
//! - Run maintenance tasks and shut down gracefully

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, Request},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::config::GatewayConfig;
use crate::discovery::{InMemoryRegistry, ServiceDiscovery, ServiceRegistry};
use crate::error::GatewayError;
use crate::http::request::{build_upstream_request, request_id, X_REQUEST_ID};
use crate::lifecycle::{maintenance, Shutdown};
use crate::observability::metrics;
use crate::resilience::CircuitBreakerRegistry;
use crate::routing::Router as GatewayRouter;
use crate::security::client::RequestIdentity;
use crate::security::{rate_limit_middleware, RateLimiterRegistry};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub router: Arc<GatewayRouter>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub limiter: Arc<RateLimiterRegistry>,
    pub registry: Arc<dyn ServiceRegistry>,
    pub discovery: Arc<ServiceDiscovery>,
    pub client: Client<HttpConnector, Body>,
}

impl AppState {
    /// Build every subsystem over the given registry backend and register
    /// the instances listed in config.
    pub fn new(config: GatewayConfig, registry: Arc<dyn ServiceRegistry>) -> Self {
        let router = Arc::new(GatewayRouter::from_config(config.routes.clone()));
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker.clone()));
        let limiter = Arc::new(RateLimiterRegistry::new(config.rate_limit.clone()));
        let discovery = Arc::new(ServiceDiscovery::new(registry.clone(), &config.discovery));

        for instance in &config.registry.instances {
            if let Err(e) = registry.register(instance.clone()) {
                tracing::warn!(service = %instance.name, error = %e, "Skipping configured instance");
            }
        }

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            config: Arc::new(config),
            router,
            breakers,
            limiter,
            registry,
            discovery,
            client,
        }
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    state: AppState,
    registry: Arc<InMemoryRegistry>,
    shutdown: Shutdown,
}

impl HttpServer {
    /// Create a new HTTP server backed by the in-memory registry.
    pub fn new(config: GatewayConfig) -> Self {
        let registry = Arc::new(InMemoryRegistry::new(config.registry.ttl));
        let state = AppState::new(config, registry.clone());
        Self {
            state,
            registry,
            shutdown: Shutdown::new(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let config = self.state.config.clone();
        tracing::info!(address = %addr, "HTTP server starting");

        let mut tasks = vec![
            maintenance::spawn_limiter_sweeper(
                self.state.limiter.clone(),
                config.rate_limit.sweep_interval,
                self.shutdown.subscribe(),
            ),
            maintenance::spawn_registry_reaper(
                self.registry.clone(),
                config.registry.reap_interval,
                self.shutdown.subscribe(),
            ),
        ];

        if config.admin.enabled {
            let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
            let admin_app = admin::setup_admin_router(self.state.clone());
            let mut admin_shutdown = self.shutdown.subscribe();
            tracing::info!(address = %config.admin.bind_address, "Admin API listening");
            tasks.push(tokio::spawn(async move {
                let served = axum::serve(admin_listener, admin_app)
                    .with_graceful_shutdown(async move {
                        let _ = admin_shutdown.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API server failed");
                }
            }));
        }

        let app = build_router(self.state).into_make_service_with_connect_info::<SocketAddr>();

        let shutdown = self.shutdown;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                shutdown.trigger();
            })
            .await?;

        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();
    let limiter = state.limiter.clone();
    let request_id_header = HeaderName::from_static(X_REQUEST_ID);

    Router::new()
        .route("/{*path}", any(gateway_handler))
        .route("/", any(gateway_handler))
        .with_state(state)
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
        .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
}

/// Main gateway handler.
/// Looks up the route, gates on the service's breaker, selects an instance
/// and forwards the request.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(request.headers());
    let identity = RequestIdentity::from_request(&request);
    let method = identity.method.clone();

    // 1. Match Route
    let route = match state.router.match_request(&request) {
        Some(route) => route.clone(),
        None => {
            tracing::warn!(request_id = %request_id, path = %identity.path, "No route matched");
            metrics::record_request(&method, 404, "none", start_time);
            return GatewayError::UnknownRoute(identity.path).into_response();
        }
    };
    let service = route.service.as_str();

    // 2. Breaker admission
    let breaker = state.breakers.get_or_create(service);
    let ticket = match breaker.admit() {
        Ok(ticket) => ticket,
        Err(err) => {
            tracing::debug!(request_id = %request_id, service = %service, error = %err, "Breaker rejected request");
            let response = err.into_response();
            metrics::record_request(&method, response.status().as_u16(), service, start_time);
            return response;
        }
    };

    // 3. Select Instance
    let affinity = identity
        .user_id
        .as_deref()
        .unwrap_or(identity.client_ip.as_str());
    let instance = match state.discovery.select(service, Some(affinity)) {
        Ok(instance) => instance,
        Err(err) => {
            // 503 to the client counts against the service.
            ticket.failure();
            tracing::warn!(request_id = %request_id, service = %service, error = %err, "No instance available");
            let response = err.into_response();
            metrics::record_request(&method, response.status().as_u16(), service, start_time);
            return response;
        }
    };

    let upstream_path = route.upstream_path(&identity.path);
    let upstream = match build_upstream_request(request, &instance, &upstream_path, &identity.client_ip) {
        Ok(upstream) => upstream,
        Err(err) => {
            ticket.failure();
            return err.into_response();
        }
    };

    tracing::debug!(
        request_id = %request_id,
        service = %service,
        instance_id = %instance.id,
        upstream = %upstream.uri(),
        "Forwarding request"
    );

    // 4. Forward
    match state.client.request(upstream).await {
        Ok(response) => {
            let status = response.status();
            ticket.finish(!status.is_server_error());
            metrics::record_request(&method, status.as_u16(), service, start_time);
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            ticket.failure();
            tracing::error!(request_id = %request_id, service = %service, instance_id = %instance.id, error = %e, "Upstream error");
            let response = GatewayError::Upstream(e.to_string()).into_response();
            metrics::record_request(&method, response.status().as_u16(), service, start_time);
            response
        }
    }
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
