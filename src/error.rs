//! Error taxonomy for the admission core.
//!
//! None of these errors are retried internally. Rate-limit and breaker
//! rejections carry a `retry_after` hint so callers can back off on their own.

use std::time::Duration;

use crate::security::limiter::Scope;

/// Errors surfaced by the admission, resilience and discovery layers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// The breaker for `name` is open; no call reached the downstream.
    #[error("circuit breaker is open")]
    BreakerOpen { name: String, retry_after: Duration },

    /// The breaker is half-open and all probe slots are taken.
    #[error("too many requests while circuit breaker is half-open")]
    BreakerHalfOpenCapacityExceeded { name: String },

    #[error("rate limit exceeded for scope {scope}")]
    RateLimitExceeded {
        scope: Scope,
        limit: u64,
        retry_after: Duration,
    },

    #[error("no healthy instance available for service {service}")]
    NoHealthyService { service: String },

    #[error("service registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("invalid service instance: {0}")]
    InvalidInstance(String),

    #[error("service instance {0} not found")]
    InstanceNotFound(String),

    #[error("no route matches path {0}")]
    UnknownRoute(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl GatewayError {
    /// Stable machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::BreakerOpen { .. } => "CIRCUIT_OPEN",
            GatewayError::BreakerHalfOpenCapacityExceeded { .. } => "CIRCUIT_HALF_OPEN_FULL",
            GatewayError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            GatewayError::NoHealthyService { .. } => "NO_HEALTHY_SERVICE",
            GatewayError::RegistryUnavailable(_) => "REGISTRY_UNAVAILABLE",
            GatewayError::InvalidInstance(_) => "INVALID_INSTANCE",
            GatewayError::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            GatewayError::UnknownRoute(_) => "NO_ROUTE",
            GatewayError::Upstream(_) => "UPSTREAM_ERROR",
        }
    }

    /// Seconds the client should wait before retrying, when known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::BreakerOpen { retry_after, .. } => Some(*retry_after),
            GatewayError::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Outcome of running a fallible operation through a circuit breaker.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError<E> {
    /// The breaker refused the call; the operation never ran.
    #[error(transparent)]
    Rejected(GatewayError),
    /// The operation ran and returned an error.
    #[error("{0}")]
    Failed(E),
}

impl<E> ExecuteError<E> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ExecuteError::Rejected(_))
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            ExecuteError::Failed(e) => Some(e),
            ExecuteError::Rejected(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_open_message() {
        let err = GatewayError::BreakerOpen {
            name: "orders".into(),
            retry_after: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "circuit breaker is open");
        assert_eq!(err.code(), "CIRCUIT_OPEN");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_execute_error_transparent() {
        let err: ExecuteError<std::io::Error> = ExecuteError::Rejected(GatewayError::BreakerOpen {
            name: "x".into(),
            retry_after: Duration::ZERO,
        });
        assert!(err.is_rejected());
        assert_eq!(err.to_string(), "circuit breaker is open");
    }
}
