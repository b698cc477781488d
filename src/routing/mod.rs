//! Request → service name resolution.
//!
//! ```text
//! Admitted request (host, path)
//!     → router.rs (priority order, then longest prefix)
//!     → matcher.rs (optional host, segment-aware path prefix)
//!     → Route { service, strip_prefix } or UnknownRoute
//! ```
//!
//! Routes name a service, never an address; discovery resolves the instance.
//! The table is built once from config and shared read-only.

pub mod matcher;
pub mod router;

pub use router::{Route, Router};
