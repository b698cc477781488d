//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! ServiceDiscovery has the healthy instances of service S
//!     → pick the strategy configured for S
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate per service)
//!         - random.rs (uniform pick)
//!         - weighted.rs (cumulative-weight draw)
//!         - least_conn.rs (highest weight, static approximation)
//!         - consistent_hash.rs (ring lookup over instance IDs)
//!     → Return one instance or None when the set is empty
//! ```
//!
//! # Design Decisions
//! - One balancer object per strategy, shared by every service; per-service
//!   state (counters, rings) lives inside it
//! - Balancers never see unhealthy instances; filtering happens upstream

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::discovery::instance::ServiceInstance;

pub mod consistent_hash;
pub mod hash_ring;
pub mod least_conn;
pub mod random;
pub mod round_robin;
pub mod weighted;

pub use consistent_hash::ConsistentHash;
pub use hash_ring::ConsistentHashRing;
pub use least_conn::LeastConnections;
pub use random::RandomSelect;
pub use round_robin::RoundRobin;
pub use weighted::WeightedRandom;

/// Picks one instance out of a service's healthy set.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// `key` is the affinity key; only consistent hashing looks at it.
    fn next_instance(
        &self,
        service: &str,
        key: &str,
        instances: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    #[default]
    RoundRobin,
    Random,
    Weighted,
    LeastConn,
    ConsistentHash,
}

impl LoadBalanceStrategy {
    pub const ALL: [LoadBalanceStrategy; 5] = [
        LoadBalanceStrategy::RoundRobin,
        LoadBalanceStrategy::Random,
        LoadBalanceStrategy::Weighted,
        LoadBalanceStrategy::LeastConn,
        LoadBalanceStrategy::ConsistentHash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalanceStrategy::RoundRobin => "round_robin",
            LoadBalanceStrategy::Random => "random",
            LoadBalanceStrategy::Weighted => "weighted",
            LoadBalanceStrategy::LeastConn => "least_conn",
            LoadBalanceStrategy::ConsistentHash => "consistent_hash",
        }
    }

    /// Fresh balancer for this strategy.
    pub fn build(&self, hash_replicas: usize) -> Box<dyn LoadBalancer> {
        match self {
            LoadBalanceStrategy::RoundRobin => Box::new(RoundRobin::new()),
            LoadBalanceStrategy::Random => Box::new(RandomSelect::new()),
            LoadBalanceStrategy::Weighted => Box::new(WeightedRandom::new()),
            LoadBalanceStrategy::LeastConn => Box::new(LeastConnections::new()),
            LoadBalanceStrategy::ConsistentHash => Box::new(ConsistentHash::new(hash_replicas)),
        }
    }
}

impl fmt::Display for LoadBalanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadBalanceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| format!("unknown load balancing strategy: {s}"))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn instance(id: &str, weight: u32) -> Arc<ServiceInstance> {
        Arc::new(
            ServiceInstance::new("svc", "127.0.0.1", 8000)
                .with_id(id)
                .with_weight(weight),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse_and_display() {
        for strategy in LoadBalanceStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<LoadBalanceStrategy>().unwrap(), strategy);
        }
        assert_eq!(
            "Least-Conn".parse::<LoadBalanceStrategy>().unwrap(),
            LoadBalanceStrategy::LeastConn
        );
        assert!("fastest".parse::<LoadBalanceStrategy>().is_err());
    }

    #[test]
    fn test_every_strategy_handles_empty_set() {
        for strategy in LoadBalanceStrategy::ALL {
            assert!(strategy.build(10).next_instance("svc", "svc", &[]).is_none());
        }
    }
}
