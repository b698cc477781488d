//! Uniform random selection.

use std::sync::Arc;

use rand::Rng;

use crate::discovery::instance::ServiceInstance;
use crate::load_balancer::LoadBalancer;

#[derive(Debug, Default)]
pub struct RandomSelect;

impl RandomSelect {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RandomSelect {
    fn next_instance(
        &self,
        _service: &str,
        _key: &str,
        instances: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>> {
        if instances.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..instances.len());
        Some(instances[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::instance;
    use std::collections::HashSet;

    #[test]
    fn test_random_covers_all_instances() {
        let lb = RandomSelect::new();
        let instances = vec![instance("a", 1), instance("b", 1), instance("c", 1)];
        let mut seen = HashSet::new();
        for _ in 0..500 {
            seen.insert(lb.next_instance("svc", "svc", &instances).unwrap().id.clone());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_single_instance() {
        let lb = RandomSelect::new();
        let instances = vec![instance("only", 1)];
        assert_eq!(lb.next_instance("svc", "svc", &instances).unwrap().id, "only");
    }
}
