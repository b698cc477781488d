//! Per-key circuit breaker ownership.
//!
//! # Responsibilities
//! - Lazily create one breaker per name (typically the target service)
//! - Apply default settings, or a per-name override from configuration
//! - Route every transition through logging and metrics before any user hook
//! - Expose administrative operations by name

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::BreakerConfig;
use crate::error::ExecuteError;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{
    BreakerSettings, BreakerStatus, CircuitBreaker, State, StateChangeHook,
};

/// Owns every breaker in the process.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: BreakerSettings,
    overrides: HashMap<String, BreakerSettings>,
    hook: StateChangeHook,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_hook(config, None)
    }

    /// Create a registry that forwards transitions to `user_hook` after
    /// logging them.
    pub fn with_hook(config: BreakerConfig, user_hook: Option<StateChangeHook>) -> Self {
        let hook: StateChangeHook = Arc::new(move |name: &str, from: State, to: State| {
            match to {
                State::Open => tracing::warn!(breaker = %name, %from, %to, "Circuit breaker opened"),
                _ => tracing::info!(breaker = %name, %from, %to, "Circuit breaker state changed"),
            }
            metrics::record_breaker_transition(name, from, to);
            if let Some(user_hook) = &user_hook {
                user_hook(name, from, to);
            }
        });

        Self {
            breakers: DashMap::new(),
            defaults: config.default,
            overrides: config.overrides,
            hook,
        }
    }

    /// Fetch the breaker for `name`, creating it on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.value().clone();
        }
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let settings = self.settings_for(name).clone();
                tracing::debug!(breaker = %name, ?settings, "Creating circuit breaker");
                Arc::new(
                    CircuitBreaker::new(name, settings).with_state_change_hook(self.hook.clone()),
                )
            })
            .value()
            .clone()
    }

    /// Existing breaker only; never creates.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.value().clone())
    }

    pub fn settings_for(&self, name: &str) -> &BreakerSettings {
        self.overrides.get(name).unwrap_or(&self.defaults)
    }

    pub fn execute<T, E, F>(&self, name: &str, f: F) -> Result<T, ExecuteError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.get_or_create(name).execute(f)
    }

    pub async fn call<T, E, Fut>(&self, name: &str, fut: Fut) -> Result<T, ExecuteError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = self.get_or_create(name);
        breaker.call(fut).await
    }

    /// Reset a breaker to Closed. Returns false if the name was never used.
    pub fn reset(&self, name: &str) -> bool {
        self.admin(name, "reset", |b| b.reset())
    }

    pub fn force_open(&self, name: &str) -> bool {
        self.admin(name, "force_open", |b| b.force_open())
    }

    pub fn force_close(&self, name: &str) -> bool {
        self.admin(name, "force_close", |b| b.force_close())
    }

    pub fn status(&self, name: &str) -> Option<BreakerStatus> {
        self.get(name).map(|b| b.status())
    }

    /// Snapshot of every breaker, sorted by name.
    pub fn all_statuses(&self) -> Vec<BreakerStatus> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|b| b.value().clone()).collect();
        let mut statuses: Vec<BreakerStatus> = breakers.iter().map(|b| b.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    fn admin(&self, name: &str, op: &str, f: impl FnOnce(&CircuitBreaker)) -> bool {
        match self.get(name) {
            Some(breaker) => {
                tracing::info!(breaker = %name, op, "Administrative breaker operation");
                f(&breaker);
                true
            }
            None => {
                tracing::warn!(breaker = %name, op, "Unknown circuit breaker");
                false
            }
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
