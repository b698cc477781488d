//! Round-robin load balancing strategy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::discovery::instance::ServiceInstance;
use crate::load_balancer::LoadBalancer;

/// Round-robin selector.
/// Keeps one counter per service so services rotate independently.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counters: Mutex<HashMap<String, usize>>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_instance(
        &self,
        service: &str,
        _key: &str,
        instances: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>> {
        if instances.is_empty() {
            return None;
        }

        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let counter = counters.entry(service.to_string()).or_insert(0);
        let index = *counter % instances.len();
        *counter = counter.wrapping_add(1);
        Some(instances[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::instance;
    use std::collections::HashMap;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let instances = vec![instance("a", 1), instance("b", 1)];

        assert_eq!(lb.next_instance("svc", "svc", &instances).unwrap().id, "a");
        assert_eq!(lb.next_instance("svc", "svc", &instances).unwrap().id, "b");
        assert_eq!(lb.next_instance("svc", "svc", &instances).unwrap().id, "a");
    }

    #[test]
    fn test_fair_within_one() {
        let lb = RoundRobin::new();
        let instances = vec![instance("a", 1), instance("b", 1), instance("c", 1)];
        let mut hits: HashMap<String, usize> = HashMap::new();
        for _ in 0..100 {
            let picked = lb.next_instance("svc", "svc", &instances).unwrap();
            *hits.entry(picked.id.clone()).or_default() += 1;
        }
        let max = *hits.values().max().unwrap();
        let min = *hits.values().min().unwrap();
        assert!(max - min <= 1, "{hits:?}");
    }

    #[test]
    fn test_services_rotate_independently() {
        let lb = RoundRobin::new();
        let instances = vec![instance("a", 1), instance("b", 1)];
        assert_eq!(lb.next_instance("orders", "", &instances).unwrap().id, "a");
        assert_eq!(lb.next_instance("users", "", &instances).unwrap().id, "a");
        assert_eq!(lb.next_instance("orders", "", &instances).unwrap().id, "b");
    }
}
