//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Initialize subsystems → Spawn maintenance → Listen
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C → broadcast → server drains, maintenance.rs loops exit
//! ```

pub mod maintenance;
pub mod shutdown;

pub use shutdown::Shutdown;
