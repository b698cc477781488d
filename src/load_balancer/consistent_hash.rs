//! Consistent-hash load balancing strategy.
//!
//! Keeps one ring per service, built over instance IDs. A ring is rebuilt
//! wholesale whenever the service's healthy membership changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::discovery::instance::ServiceInstance;
use crate::load_balancer::hash_ring::ConsistentHashRing;
use crate::load_balancer::LoadBalancer;

#[derive(Debug)]
struct CachedRing {
    /// Sorted member IDs the ring was built from.
    members: Vec<String>,
    ring: ConsistentHashRing,
}

#[derive(Debug)]
pub struct ConsistentHash {
    replicas: usize,
    rings: Mutex<HashMap<String, CachedRing>>,
}

impl ConsistentHash {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas,
            rings: Mutex::new(HashMap::new()),
        }
    }

    fn build_ring(&self, instances: &[Arc<ServiceInstance>]) -> ConsistentHashRing {
        let mut ring = ConsistentHashRing::new(self.replicas);
        for instance in instances {
            ring.add(&instance.id);
        }
        ring
    }
}

impl LoadBalancer for ConsistentHash {
    fn next_instance(
        &self,
        service: &str,
        key: &str,
        instances: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>> {
        if instances.is_empty() {
            return None;
        }

        let mut members: Vec<&str> = instances.iter().map(|i| i.id.as_str()).collect();
        members.sort_unstable();

        let mut rings = self.rings.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let stale = rings.get(service).map_or(true, |cached| {
            !cached.members.iter().map(String::as_str).eq(members.iter().copied())
        });
        if stale {
            tracing::debug!(service = %service, instances = instances.len(), "Rebuilding hash ring");
            let ring = self.build_ring(instances);
            rings.insert(
                service.to_string(),
                CachedRing {
                    members: members.iter().map(|id| id.to_string()).collect(),
                    ring,
                },
            );
        }

        let node = rings.get(service)?.ring.get(key)?;
        instances.iter().find(|i| i.id == node).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::instance;

    #[test]
    fn test_same_key_same_instance() {
        let lb = ConsistentHash::new(100);
        let instances = vec![instance("a", 1), instance("b", 1), instance("c", 1)];
        let first = lb.next_instance("svc", "user-42", &instances).unwrap();
        for _ in 0..20 {
            assert_eq!(lb.next_instance("svc", "user-42", &instances).unwrap().id, first.id);
        }
    }

    #[test]
    fn test_matches_standalone_ring() {
        let lb = ConsistentHash::new(100);
        let instances = vec![instance("a", 1), instance("b", 1), instance("c", 1)];
        let mut ring = ConsistentHashRing::new(100);
        for id in ["a", "b", "c"] {
            ring.add(id);
        }
        for i in 0..50 {
            let key = format!("k{i}");
            assert_eq!(
                lb.next_instance("svc", &key, &instances).unwrap().id,
                ring.get(&key).unwrap()
            );
        }
    }

    #[test]
    fn test_rebuild_on_size_change() {
        let lb = ConsistentHash::new(100);
        let two = vec![instance("a", 1), instance("b", 1)];
        let three = vec![instance("a", 1), instance("b", 1), instance("c", 1)];
        lb.next_instance("svc", "k", &two).unwrap();
        let mut saw_c = false;
        for i in 0..200 {
            if lb.next_instance("svc", &format!("k{i}"), &three).unwrap().id == "c" {
                saw_c = true;
            }
        }
        assert!(saw_c);
    }

    #[test]
    fn test_rebuild_on_same_size_swap() {
        let lb = ConsistentHash::new(100);
        let before = vec![instance("a", 1), instance("b", 1), instance("c", 1)];
        let after = vec![instance("a", 1), instance("b", 1), instance("d", 1)];
        for i in 0..200 {
            lb.next_instance("svc", &format!("k{i}"), &before).unwrap();
        }

        let mut ring = ConsistentHashRing::new(100);
        for id in ["a", "b", "d"] {
            ring.add(id);
        }
        let mut saw_d = false;
        for i in 0..200 {
            let key = format!("k{i}");
            let picked = lb.next_instance("svc", &key, &after).unwrap();
            assert_eq!(picked.id, ring.get(&key).unwrap());
            saw_d |= picked.id == "d";
        }
        assert!(saw_d);
    }
}
