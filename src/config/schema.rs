//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.
//! Durations use humantime strings (`"30s"`, `"5m"`).

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::instance::ServiceInstance;
use crate::load_balancer::hash_ring::DEFAULT_REPLICAS;
use crate::load_balancer::LoadBalanceStrategy;
use crate::resilience::circuit_breaker::BreakerSettings;
use crate::security::limiter::{LimitPolicy, PathRule};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Route definitions mapping request paths to services.
    pub routes: Vec<RouteConfig>,

    /// Circuit breaker settings.
    pub breaker: BreakerConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Load balancing per service.
    pub discovery: DiscoveryConfig,

    /// Registry TTL and seeded instances.
    pub registry: RegistryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Route configuration mapping requests to a service name.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host header to match (exact match).
    #[serde(default)]
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: String,

    /// Service name resolved through discovery.
    pub service: String,

    /// Remove the matched prefix before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Circuit breaker defaults and per-name overrides.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BreakerConfig {
    pub default: BreakerSettings,
    pub overrides: HashMap<String, BreakerSettings>,
}

/// Rate limiting configuration. A scope left as `None` is not limited.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    pub global: Option<LimitPolicy>,
    pub ip: Option<LimitPolicy>,
    pub user: Option<LimitPolicy>,
    pub api_key: Option<LimitPolicy>,

    /// Base token-bucket policy divided by the current load factor.
    pub adaptive: Option<LimitPolicy>,

    /// Per (method, path prefix) rules.
    pub paths: Vec<PathRule>,

    /// Client IPs exempt from the IP scope.
    pub whitelist: Vec<IpAddr>,

    /// Upper bound on tracked keys across all scopes.
    pub max_entries: usize,

    /// Keys unused for this long are swept.
    #[serde(with = "humantime_serde")]
    pub idle_ttl: Duration,

    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global: None,
            ip: None,
            user: None,
            api_key: None,
            adaptive: None,
            paths: Vec::new(),
            whitelist: Vec::new(),
            max_entries: 100_000,
            idle_ttl: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub default_strategy: LoadBalanceStrategy,

    /// Per-service strategy overrides.
    pub strategies: HashMap<String, LoadBalanceStrategy>,

    /// Virtual nodes per instance on consistent-hash rings.
    pub hash_replicas: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            default_strategy: LoadBalanceStrategy::RoundRobin,
            strategies: HashMap::new(),
            hash_replicas: DEFAULT_REPLICAS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Heartbeat TTL; zero disables expiry.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,

    /// Instances registered at startup.
    pub instances: Vec<ServiceInstance>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            reap_interval: Duration::from_secs(10),
            instances: Vec::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
