//! Service discovery subsystem.
//!
//! # Data Flow
//! ```text
//! Registrar (admin API / config seed)
//!     → registry.rs (register, heartbeat, deregister; broadcast events)
//!
//! Gateway request for service S:
//!     → service.rs (healthy set of S from the registry)
//!     → load_balancer (strategy configured for S)
//!     → one ServiceInstance, or NoHealthyService
//! ```
//!
//! # Design Decisions
//! - Only Active instances with a fresh heartbeat are ever returned
//! - Registry backend is a trait object; the in-memory one ships by default
//! - Watches are cancellation-aware; nothing else here awaits

pub mod instance;
pub mod registry;
pub mod service;

pub use instance::{InstanceStatus, ServiceInstance};
pub use registry::{InMemoryRegistry, ServiceEvent, ServiceRegistry, ServiceWatch};
pub use service::{ServiceDiscovery, SubscriptionId};
