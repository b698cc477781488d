//! Rate limiting middleware.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::GatewayError;
use crate::http::response::apply_rate_limit_headers;
use crate::observability::metrics;
use crate::security::client::RequestIdentity;
use crate::security::limiter::RateLimiterRegistry;

/// Runs every configured scope before the request reaches the gateway
/// handler. Rejections short-circuit with 429.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiterRegistry>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let identity = RequestIdentity::from_request(&request);

    match limiter.admit(&identity) {
        Ok(decision) => {
            let mut response = next.run(request).await;
            if let Some(decision) = decision {
                apply_rate_limit_headers(response.headers_mut(), &decision);
            }
            response
        }
        Err(err) => {
            if let GatewayError::RateLimitExceeded { scope, .. } = &err {
                metrics::record_rate_limited(scope.as_str());
            }
            tracing::debug!(
                client_ip = %identity.client_ip,
                method = %identity.method,
                path = %identity.path,
                "Request rejected by rate limiter"
            );
            err.into_response()
        }
    }
}
