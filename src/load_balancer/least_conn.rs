//! Least Connections load balancing strategy.
//!
//! No live connection counts are tracked. Weight stands in for spare
//! capacity: the instance with the highest weight is treated as the least
//! loaded.

use std::sync::Arc;

use crate::discovery::instance::ServiceInstance;
use crate::load_balancer::LoadBalancer;

/// Least connections selector (static approximation).
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for LeastConnections {
    fn next_instance(
        &self,
        _service: &str,
        _key: &str,
        instances: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>> {
        // In case of tie, the first one is selected (stability)
        instances
            .iter()
            .fold(None::<&Arc<ServiceInstance>>, |best, candidate| match best {
                Some(b) if b.weight >= candidate.weight => Some(b),
                _ => Some(candidate),
            })
            .cloned()
    }
}
