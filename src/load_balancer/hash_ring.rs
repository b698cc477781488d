//! Consistent hash ring.
//!
//! Each node is placed `replicas` times on a `u32` ring. A key maps to the
//! first point clockwise from its own hash. Positions come from the first four
//! bytes of SHA-256, so the mapping is identical across processes and builds.

use sha2::{Digest, Sha256};

pub const DEFAULT_REPLICAS: usize = 100;

#[derive(Debug, Clone)]
pub struct ConsistentHashRing {
    replicas: usize,
    /// Sorted by hash.
    points: Vec<(u32, String)>,
}

impl ConsistentHashRing {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
            points: Vec::new(),
        }
    }

    pub fn add(&mut self, node: &str) {
        self.points.reserve(self.replicas);
        for i in 0..self.replicas {
            let point = hash_key(&format!("{node}#{i}"));
            self.points.push((point, node.to_string()));
        }
        // Ties broken by node name keep lookups independent of insertion order.
        self.points.sort_unstable();
    }

    /// Node owning `key`, or `None` on an empty ring.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let target = hash_key(key);
        let idx = self.points.partition_point(|(point, _)| *point < target);
        let idx = if idx == self.points.len() { 0 } else { idx };
        Some(self.points[idx].1.as_str())
    }

    /// Number of virtual points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }
}

impl Default for ConsistentHashRing {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICAS)
    }
}

pub fn hash_key(key: &str) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
