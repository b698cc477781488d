//! Error and rate-limit responses.
//!
//! # Responsibilities
//! - Map `GatewayError` to an HTTP status and JSON body
//! - Attach `X-RateLimit-*` and `Retry-After` headers
//!
//! # Design Decisions
//! - Body shape is fixed: `{error, code, timestamp, retry_after?}`
//! - `timestamp` is unix seconds; `retry_after` is whole seconds rounded up

use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::security::limiter::{ceil_secs, RateLimitDecision, MAX_RESET_AFTER};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorBody {
    pub fn from_error(err: &GatewayError) -> Self {
        Self {
            error: err.to_string(),
            code: err.code().to_string(),
            timestamp: unix_now(),
            retry_after: err
                .retry_after()
                .map(|d| ceil_secs(d.min(MAX_RESET_AFTER)).max(1)),
        }
    }
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::BreakerOpen { .. }
            | GatewayError::BreakerHalfOpenCapacityExceeded { .. }
            | GatewayError::NoHealthyService { .. }
            | GatewayError::RegistryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::InvalidInstance(_) => StatusCode::BAD_REQUEST,
            GatewayError::InstanceNotFound(_) | GatewayError::UnknownRoute(_) => {
                StatusCode::NOT_FOUND
            }
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody::from_error(&self);
        let mut response = (status, Json(&body)).into_response();

        if let Some(retry_after) = body.retry_after {
            insert_header(response.headers_mut(), "retry-after", retry_after);
        }
        if let GatewayError::RateLimitExceeded {
            limit, retry_after, ..
        } = &self
        {
            let reset = unix_now().saturating_add(ceil_secs((*retry_after).min(MAX_RESET_AFTER)));
            let headers = response.headers_mut();
            insert_header(headers, X_RATELIMIT_LIMIT, *limit);
            insert_header(headers, X_RATELIMIT_REMAINING, 0);
            insert_header(headers, X_RATELIMIT_RESET, reset);
        }
        response
    }
}

/// Headers for an admitted request, taken from the tightest scope checked.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    insert_header(headers, X_RATELIMIT_LIMIT, decision.limit);
    insert_header(headers, X_RATELIMIT_REMAINING, decision.remaining);
    insert_header(headers, X_RATELIMIT_RESET, decision.reset_at_unix());
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: u64) {
    headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::limiter::Scope;
    use std::time::Duration;

    #[test]
    fn test_rate_limit_response_headers() {
        let err = GatewayError::RateLimitExceeded {
            scope: Scope::Ip,
            limit: 5,
            retry_after: Duration::from_millis(59_200),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers["x-ratelimit-limit"], "5");
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert_eq!(headers["retry-after"], "60");
        let reset: u64 = headers["x-ratelimit-reset"].to_str().unwrap().parse().unwrap();
        assert!(reset >= unix_now() + 59);
    }

    #[test]
    fn test_unbounded_retry_after_does_not_overflow() {
        let err = GatewayError::RateLimitExceeded {
            scope: Scope::Adaptive,
            limit: 1,
            retry_after: Duration::MAX,
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let reset: u64 = response.headers()["x-ratelimit-reset"]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(reset <= unix_now() + MAX_RESET_AFTER.as_secs() + 1);
    }

    #[test]
    fn test_status_mapping() {
        let open = GatewayError::BreakerOpen {
            name: "orders".into(),
            retry_after: Duration::from_secs(3),
        };
        assert_eq!(open.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        let none = GatewayError::NoHealthyService {
            service: "orders".into(),
        };
        assert_eq!(none.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            GatewayError::InvalidInstance("port".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_error_body_omits_missing_retry_after() {
        let body = ErrorBody::from_error(&GatewayError::NoHealthyService {
            service: "orders".into(),
        });
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], "NO_HEALTHY_SERVICE");
        assert!(json.get("retry_after").is_none());
    }
}
