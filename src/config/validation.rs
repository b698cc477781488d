//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds ≥ 1, windows > 0, addresses parse)
//! - Check referential integrity (routes name a service, policies fit scopes)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;
use crate::security::limiter::LimitPolicy;

/// One semantic problem, located by its config path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("invalid socket address: {}", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    let mut route_names = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        let field = format!("routes[{i}]");
        if !route_names.insert(route.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{field}.name"),
                format!("duplicate route name: {}", route.name),
            ));
        }
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(format!("{field}.path_prefix"), "must start with '/'"));
        }
        if route.service.trim().is_empty() {
            errors.push(ValidationError::new(format!("{field}.service"), "must not be empty"));
        }
    }

    if let Err(problems) = config.breaker.default.validate() {
        for problem in problems {
            errors.push(ValidationError::new("breaker.default", problem));
        }
    }
    for (name, settings) in &config.breaker.overrides {
        if let Err(problems) = settings.validate() {
            for problem in problems {
                errors.push(ValidationError::new(format!("breaker.overrides.{name}"), problem));
            }
        }
    }

    let rl = &config.rate_limit;
    for (field, policy) in [
        ("rate_limit.global", &rl.global),
        ("rate_limit.ip", &rl.ip),
        ("rate_limit.user", &rl.user),
        ("rate_limit.api_key", &rl.api_key),
        ("rate_limit.adaptive", &rl.adaptive),
    ] {
        if let Some(policy) = policy {
            if let Err(problem) = policy.validate() {
                errors.push(ValidationError::new(field, problem));
            }
        }
    }
    if let Some(LimitPolicy::SlidingWindow { .. }) = rl.adaptive {
        errors.push(ValidationError::new(
            "rate_limit.adaptive",
            "adaptive scope requires the token_bucket algorithm",
        ));
    }
    for (i, rule) in rl.paths.iter().enumerate() {
        let field = format!("rate_limit.paths[{i}]");
        if !rule.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(format!("{field}.path_prefix"), "must start with '/'"));
        }
        if let Err(problem) = rule.policy.validate() {
            errors.push(ValidationError::new(format!("{field}.policy"), problem));
        }
    }
    if rl.max_entries == 0 {
        errors.push(ValidationError::new("rate_limit.max_entries", "must be greater than 0"));
    }
    if rl.idle_ttl.is_zero() {
        errors.push(ValidationError::new("rate_limit.idle_ttl", "must be greater than 0"));
    }
    if rl.sweep_interval.is_zero() {
        errors.push(ValidationError::new("rate_limit.sweep_interval", "must be greater than 0"));
    }

    if config.discovery.hash_replicas == 0 {
        errors.push(ValidationError::new("discovery.hash_replicas", "must be greater than 0"));
    }

    if config.registry.reap_interval.is_zero() {
        errors.push(ValidationError::new("registry.reap_interval", "must be greater than 0"));
    }
    for (i, instance) in config.registry.instances.iter().enumerate() {
        if let Err(err) = instance.validate() {
            errors.push(ValidationError::new(format!("registry.instances[{i}]"), err.to_string()));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address: {}", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled {
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty when admin is enabled"));
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("invalid socket address: {}", config.admin.bind_address),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteConfig;
    use crate::resilience::circuit_breaker::BreakerSettings;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.breaker.default = BreakerSettings::new().with_failure_threshold(0);
        config.rate_limit.adaptive = Some(LimitPolicy::SlidingWindow {
            limit: 5,
            window: Duration::from_secs(1),
        });
        config.routes.push(RouteConfig {
            name: "orders".into(),
            host: None,
            path_prefix: "api".into(),
            service: "orders".into(),
            strip_prefix: false,
            priority: 0,
        });

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"listener.bind_address"));
        assert!(fields.contains(&"breaker.default"));
        assert!(fields.contains(&"rate_limit.adaptive"));
        assert!(fields.contains(&"routes[0].path_prefix"));
    }

    #[test]
    fn test_admin_key_required_when_enabled() {
        let mut config = GatewayConfig::default();
        config.admin.enabled = true;
        config.admin.api_key = "  ".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "admin.api_key");
    }
}
