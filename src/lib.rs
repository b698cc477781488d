//! Gateway traffic-admission and resilience core.
//!
//! - [`resilience`]: per-service circuit breakers with generation invalidation
//! - [`security`]: token-bucket and sliding-window limiters across scopes
//! - [`discovery`] + [`load_balancer`]: service registry and instance selection
//!
//! The [`http`] module wires these behind an Axum gateway.

pub mod admin;
pub mod config;
pub mod discovery;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::GatewayConfig;
pub use error::{ExecuteError, GatewayError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
