//! Admin API handlers.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::discovery::{InstanceStatus, ServiceInstance};
use crate::error::GatewayError;
use crate::http::server::AppState;
use crate::load_balancer::LoadBalanceStrategy;
use crate::resilience::BreakerStatus;
use crate::security::limiter::{LimiterStats, Scope};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub breakers: usize,
    pub instances: usize,
    pub rate_limit_entries: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Result<Json<SystemStatus>, GatewayError> {
    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        breakers: state.breakers.len(),
        instances: state.registry.list_all_services()?.len(),
        rate_limit_entries: state.limiter.len(),
    }))
}

// --- Breakers ---

pub async fn list_breakers(State(state): State<AppState>) -> Json<Vec<BreakerStatus>> {
    Json(state.breakers.all_statuses())
}

pub async fn get_breaker(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.breakers.status(&name) {
        Some(status) => Json(status).into_response(),
        None => breaker_not_found(&name),
    }
}

pub async fn reset_breaker(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    breaker_op(&state, &name, state.breakers.reset(&name))
}

pub async fn open_breaker(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    breaker_op(&state, &name, state.breakers.force_open(&name))
}

pub async fn close_breaker(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    breaker_op(&state, &name, state.breakers.force_close(&name))
}

fn breaker_op(state: &AppState, name: &str, found: bool) -> Response {
    match (found, state.breakers.status(name)) {
        (true, Some(status)) => Json(status).into_response(),
        _ => breaker_not_found(name),
    }
}

fn breaker_not_found(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("unknown circuit breaker: {name}") })),
    )
        .into_response()
}

// --- Registry ---

pub async fn list_services(
    State(state): State<AppState>,
) -> Result<Json<Vec<ServiceInstance>>, GatewayError> {
    Ok(Json(state.registry.list_all_services()?))
}

pub async fn register_service(
    State(state): State<AppState>,
    Json(instance): Json<ServiceInstance>,
) -> Result<(StatusCode, Json<ServiceInstance>), GatewayError> {
    let stored = state.registry.register(instance)?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, GatewayError> {
    state.registry.heartbeat(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct StatusUpdate {
    pub status: InstanceStatus,
}

pub async fn set_service_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> Result<StatusCode, GatewayError> {
    state.registry.set_status(&id, update.status)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn deregister_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServiceInstance>, GatewayError> {
    Ok(Json(state.registry.deregister(&id)?))
}

// --- Discovery ---

#[derive(Deserialize, Default)]
pub struct DiscoveryQuery {
    pub tag: Option<String>,
    #[serde(flatten)]
    pub meta: HashMap<String, String>,
}

/// Healthy instances, filtered by service name, tag or metadata.
pub async fn discover(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<DiscoveryQuery>,
) -> Result<Json<Vec<ServiceInstance>>, GatewayError> {
    let instances = state.discovery.discover_services(&name)?;
    let filtered = instances
        .into_iter()
        .filter(|i| query.tag.as_deref().map_or(true, |tag| i.has_tag(tag)))
        .filter(|i| i.matches_meta(&query.meta))
        .map(|i| (*i).clone())
        .collect();
    Ok(Json(filtered))
}

pub async fn discover_by_tag(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Json<Vec<ServiceInstance>>, GatewayError> {
    let instances = state.discovery.discover_services_by_tag(&tag)?;
    Ok(Json(instances.into_iter().map(|i| (*i).clone()).collect()))
}

#[derive(Deserialize)]
pub struct EndpointQuery {
    pub strategy: Option<LoadBalanceStrategy>,
    pub key: Option<String>,
}

#[derive(Serialize)]
pub struct EndpointResponse {
    pub strategy: LoadBalanceStrategy,
    pub instance: ServiceInstance,
}

pub async fn select_endpoint(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<EndpointQuery>,
) -> Result<Json<EndpointResponse>, GatewayError> {
    let strategy = query
        .strategy
        .unwrap_or_else(|| state.discovery.strategy_for(&name));
    let key = query.key.as_deref().unwrap_or(&name);
    let instance = state.discovery.get_endpoint_for_key(&name, strategy, key)?;
    Ok(Json(EndpointResponse {
        strategy,
        instance: (*instance).clone(),
    }))
}

// --- Rate limits ---

pub async fn rate_limit_stats(State(state): State<AppState>) -> Json<LimiterStats> {
    Json(state.limiter.stats())
}

#[derive(Deserialize)]
pub struct LoadFactorUpdate {
    pub factor: f64,
}

pub async fn set_load_factor(
    State(state): State<AppState>,
    Json(update): Json<LoadFactorUpdate>,
) -> Json<LimiterStats> {
    state.limiter.set_load_factor(update.factor);
    Json(state.limiter.stats())
}

pub async fn reset_rate_limit(
    State(state): State<AppState>,
    Path((scope, identifier)): Path<(Scope, String)>,
) -> StatusCode {
    if state.limiter.reset(scope, &identifier) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
