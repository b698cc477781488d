//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, rate limiting)
//!     → routing (path prefix → service)
//!     → resilience (breaker ticket for the service)
//!     → discovery + load_balancer (pick an instance)
//!     → request.rs (rewrite for upstream)
//!     → response.rs (JSON errors, X-RateLimit-* headers)
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::ErrorBody;
pub use server::{build_router, AppState, HttpServer};
