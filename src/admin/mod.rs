//! Administrative API.
//!
//! Served on its own listener and guarded by a bearer token.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use self::auth::{admin_auth_middleware, AdminKey};
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    let key = AdminKey(Arc::from(state.config.admin.api_key.as_str()));

    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers", get(list_breakers))
        .route("/admin/breakers/{name}", get(get_breaker))
        .route("/admin/breakers/{name}/reset", post(reset_breaker))
        .route("/admin/breakers/{name}/open", post(open_breaker))
        .route("/admin/breakers/{name}/close", post(close_breaker))
        .route("/admin/services", get(list_services).post(register_service))
        .route("/admin/services/{id}", delete(deregister_service))
        .route("/admin/services/{id}/heartbeat", put(heartbeat))
        .route("/admin/services/{id}/status", put(set_service_status))
        .route("/admin/discovery/{name}", get(discover))
        .route("/admin/discovery/{name}/endpoint", get(select_endpoint))
        .route("/admin/tags/{tag}", get(discover_by_tag))
        .route("/admin/rate-limits", get(rate_limit_stats))
        .route("/admin/rate-limits/load-factor", put(set_load_factor))
        .route("/admin/rate-limits/{scope}/{identifier}", delete(reset_rate_limit))
        .layer(middleware::from_fn_with_state(key, admin_auth_middleware))
        .with_state(state)
}
