//! Service instance record.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Lifecycle status set by the registrar or an operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Active,
    Inactive,
    /// Finishing in-flight work; receives no new traffic.
    Draining,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Active => "active",
            InstanceStatus::Inactive => "inactive",
            InstanceStatus::Draining => "draining",
        };
        f.write_str(s)
    }
}

fn default_weight() -> u32 {
    1
}

/// One reachable copy of a named service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Assigned at registration when left empty.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(with = "humantime_serde", default = "SystemTime::now")]
    pub last_heartbeat: SystemTime,
}

impl ServiceInstance {
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            address: address.into(),
            port,
            tags: Vec::new(),
            meta: HashMap::new(),
            weight: default_weight(),
            status: InstanceStatus::Active,
            last_heartbeat: SystemTime::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    /// `address:port`, ready for a URI authority.
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            // Bare IPv6 literal
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Every pair in `filter` is present with the same value.
    pub fn matches_meta(&self, filter: &HashMap<String, String>) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.meta.get(k).map_or(false, |mine| mine == v))
    }

    /// No heartbeat within `ttl`. A zero TTL never expires.
    pub fn is_expired_at(&self, ttl: Duration, now: SystemTime) -> bool {
        if ttl.is_zero() {
            return false;
        }
        now.duration_since(self.last_heartbeat)
            .map_or(false, |age| age > ttl)
    }

    pub fn is_healthy_at(&self, ttl: Duration, now: SystemTime) -> bool {
        self.status == InstanceStatus::Active && !self.is_expired_at(ttl, now)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.name.trim().is_empty() {
            return Err(GatewayError::InvalidInstance("name must not be empty".into()));
        }
        if self.address.trim().is_empty() {
            return Err(GatewayError::InvalidInstance("address must not be empty".into()));
        }
        if self.port == 0 {
            return Err(GatewayError::InvalidInstance("port must be greater than 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_formats() {
        assert_eq!(ServiceInstance::new("a", "10.0.0.1", 8080).endpoint(), "10.0.0.1:8080");
        assert_eq!(ServiceInstance::new("a", "::1", 8080).endpoint(), "[::1]:8080");
        assert_eq!(ServiceInstance::new("a", "orders.internal", 80).endpoint(), "orders.internal:80");
    }

    #[test]
    fn test_health_requires_active_and_fresh_heartbeat() {
        let now = SystemTime::now();
        let ttl = Duration::from_secs(30);
        let mut inst = ServiceInstance::new("orders", "10.0.0.1", 80);
        inst.last_heartbeat = now - Duration::from_secs(10);
        assert!(inst.is_healthy_at(ttl, now));

        inst.last_heartbeat = now - Duration::from_secs(31);
        assert!(inst.is_expired_at(ttl, now));
        assert!(!inst.is_healthy_at(ttl, now));
        assert!(!inst.is_expired_at(Duration::ZERO, now));

        inst.last_heartbeat = now;
        inst.status = InstanceStatus::Draining;
        assert!(!inst.is_healthy_at(ttl, now));
    }

    #[test]
    fn test_meta_filter() {
        let inst = ServiceInstance::new("orders", "10.0.0.1", 80)
            .with_meta("zone", "eu-1")
            .with_meta("version", "2");
        let mut filter = HashMap::new();
        filter.insert("zone".to_string(), "eu-1".to_string());
        assert!(inst.matches_meta(&filter));
        filter.insert("version".to_string(), "3".to_string());
        assert!(!inst.matches_meta(&filter));
        assert!(inst.matches_meta(&HashMap::new()));
    }

    #[test]
    fn test_validate() {
        assert!(ServiceInstance::new("orders", "10.0.0.1", 80).validate().is_ok());
        assert!(ServiceInstance::new("", "10.0.0.1", 80).validate().is_err());
        assert!(ServiceInstance::new("orders", "10.0.0.1", 0).validate().is_err());
    }

    #[test]
    fn test_deserialize_defaults() {
        let inst: ServiceInstance =
            toml::from_str("name = \"orders\"\naddress = \"127.0.0.1\"\nport = 9000").unwrap();
        assert!(inst.id.is_empty());
        assert_eq!(inst.weight, 1);
        assert_eq!(inst.status, InstanceStatus::Active);
    }
}
