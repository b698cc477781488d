//! Security subsystem: request admission.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → client.rs (method, path, client IP, API key, user ID)
//!     → limiter.rs (global → ip → user → path → api_key → adaptive)
//!         → token_bucket.rs / sliding_window.rs (per key)
//!     → rate_limit.rs (429 on rejection, X-RateLimit-* on admit)
//!     → Pass to routing
//! ```
//!
//! # Design Decisions
//! - Scopes are separate key namespaces (`scope:identifier`)
//! - Whitelisted IPs skip the IP scope only
//! - Unconfigured scopes fail open

pub mod client;
pub mod limiter;
pub mod rate_limit;
pub mod sliding_window;
pub mod token_bucket;

pub use client::RequestIdentity;
pub use limiter::{LimitPolicy, PathRule, RateLimitDecision, RateLimiterRegistry, Scope};
pub use rate_limit::rate_limit_middleware;
