//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Admission path produces:
//!     → logging.rs (tracing events; breaker transitions, rejections, reaping)
//!     → metrics.rs (request counters and latency, 429s per scope,
//!                   breaker transitions and state, registry size)
//!
//! Consumers:
//!     → stdout (fmt layer, EnvFilter)
//!     → Prometheus scrape listener
//! ```
//!
//! Recording is a no-op until `init_metrics` installs the exporter, so tests
//! and embedders pay nothing.

pub mod logging;
pub mod metrics;
