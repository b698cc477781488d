//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Admitted request for service S:
//!     → registry.rs (look up or lazily create breaker S)
//!     → circuit_breaker.rs (before_request: reject if open / half-open full)
//!     → downstream call (breaker unlocked)
//!     → circuit_breaker.rs (after_request: drop stale generations, update counts)
//! ```
//!
//! # Design Decisions
//! - Per-service breaker, not global
//! - Fail fast in Open state (no waiting for timeout)
//! - Retry and backoff are left to the caller

pub mod circuit_breaker;
pub mod registry;

pub use circuit_breaker::{BreakerSettings, BreakerStatus, BreakerTicket, CircuitBreaker, State};
pub use registry::CircuitBreakerRegistry;
