//! Weighted random selection.
//!
//! Draws `r` uniformly from `[0, total_weight)` and walks the cumulative sum.
//! Zero weights count as 1 so an instance registered without a weight still
//! receives traffic.

use std::sync::Arc;

use rand::Rng;

use crate::discovery::instance::ServiceInstance;
use crate::load_balancer::LoadBalancer;

#[derive(Debug, Default)]
pub struct WeightedRandom;

impl WeightedRandom {
    pub fn new() -> Self {
        Self
    }

    /// Instance owning position `point` in the cumulative weight line.
    fn pick(instances: &[Arc<ServiceInstance>], point: u64) -> Option<Arc<ServiceInstance>> {
        let mut cumulative = 0u64;
        for instance in instances {
            cumulative += effective_weight(instance);
            if point < cumulative {
                return Some(instance.clone());
            }
        }
        instances.last().cloned()
    }
}

fn effective_weight(instance: &ServiceInstance) -> u64 {
    instance.weight.max(1) as u64
}

impl LoadBalancer for WeightedRandom {
    fn next_instance(
        &self,
        _service: &str,
        _key: &str,
        instances: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>> {
        if instances.is_empty() {
            return None;
        }
        let total: u64 = instances.iter().map(|i| effective_weight(i)).sum();
        let point = rand::thread_rng().gen_range(0..total);
        Self::pick(instances, point)
    }
}
