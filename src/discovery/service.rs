//! Service discovery: healthy-set queries plus load-balanced selection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::DiscoveryConfig;
use crate::discovery::instance::ServiceInstance;
use crate::discovery::registry::{ServiceRegistry, ServiceWatch};
use crate::error::{GatewayError, Result};
use crate::load_balancer::{LoadBalanceStrategy, LoadBalancer};

/// Handle returned by [`ServiceDiscovery::subscribe`].
pub type SubscriptionId = Uuid;

pub struct ServiceDiscovery {
    registry: Arc<dyn ServiceRegistry>,
    balancers: HashMap<LoadBalanceStrategy, Box<dyn LoadBalancer>>,
    default_strategy: LoadBalanceStrategy,
    strategies: HashMap<String, LoadBalanceStrategy>,
    /// Parent of every subscription token.
    root: CancellationToken,
    /// Live subscriptions. Entries whose token is cancelled are pruned on
    /// the next subscribe, unsubscribe or count.
    subscriptions: Mutex<HashMap<SubscriptionId, CancellationToken>>,
}

impl ServiceDiscovery {
    pub fn new(registry: Arc<dyn ServiceRegistry>, config: &DiscoveryConfig) -> Self {
        let balancers = LoadBalanceStrategy::ALL
            .into_iter()
            .map(|strategy| (strategy, strategy.build(config.hash_replicas)))
            .collect();

        Self {
            registry,
            balancers,
            default_strategy: config.default_strategy,
            strategies: config.strategies.clone(),
            root: CancellationToken::new(),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.registry
    }

    /// Strategy configured for `service`, else the default.
    pub fn strategy_for(&self, service: &str) -> LoadBalanceStrategy {
        self.strategies
            .get(service)
            .copied()
            .unwrap_or(self.default_strategy)
    }

    pub fn discover_services(&self, name: &str) -> Result<Vec<Arc<ServiceInstance>>> {
        self.registry.healthy_services(name)
    }

    pub fn discover_services_by_tag(&self, tag: &str) -> Result<Vec<Arc<ServiceInstance>>> {
        Ok(self
            .registry
            .all_healthy()?
            .into_iter()
            .filter(|i| i.has_tag(tag))
            .collect())
    }

    pub fn discover_services_by_meta(
        &self,
        meta: &HashMap<String, String>,
    ) -> Result<Vec<Arc<ServiceInstance>>> {
        Ok(self
            .registry
            .all_healthy()?
            .into_iter()
            .filter(|i| i.matches_meta(meta))
            .collect())
    }

    /// Pick one healthy instance of `name`. Consistent hashing keys on the
    /// service name.
    pub fn get_service_endpoint(
        &self,
        name: &str,
        strategy: LoadBalanceStrategy,
    ) -> Result<Arc<ServiceInstance>> {
        self.get_endpoint_for_key(name, strategy, name)
    }

    /// Pick one healthy instance of `name` using `key` as the affinity key.
    ///
    /// A registry failure here degrades to `NoHealthyService`.
    pub fn get_endpoint_for_key(
        &self,
        name: &str,
        strategy: LoadBalanceStrategy,
        key: &str,
    ) -> Result<Arc<ServiceInstance>> {
        let no_healthy = || GatewayError::NoHealthyService {
            service: name.to_string(),
        };

        let instances = match self.registry.healthy_services(name) {
            Ok(instances) => instances,
            Err(err) => {
                tracing::warn!(service = %name, error = %err, "Registry lookup failed during endpoint selection");
                return Err(no_healthy());
            }
        };
        if instances.is_empty() {
            tracing::debug!(service = %name, "No healthy instances");
            return Err(no_healthy());
        }

        let balancer = self.balancers.get(&strategy).ok_or_else(no_healthy)?;
        let picked = balancer
            .next_instance(name, key, &instances)
            .ok_or_else(no_healthy)?;
        tracing::trace!(
            service = %name,
            %strategy,
            instance_id = %picked.id,
            endpoint = %picked.endpoint(),
            "Endpoint selected"
        );
        Ok(picked)
    }

    /// Select with the configured strategy for `name`.
    pub fn select(&self, name: &str, key: Option<&str>) -> Result<Arc<ServiceInstance>> {
        self.get_endpoint_for_key(name, self.strategy_for(name), key.unwrap_or(name))
    }

    /// Watch membership changes of `name` (every service when `None`).
    ///
    /// The subscription ends when the watch is cancelled or dropped, when
    /// [`unsubscribe`](Self::unsubscribe) is called, or when discovery is
    /// dropped.
    pub fn subscribe(&self, name: Option<&str>) -> (SubscriptionId, ServiceWatch) {
        let id = Uuid::new_v4();
        let token = self.root.child_token();
        {
            let mut subscriptions = self.lock_subscriptions();
            subscriptions.retain(|_, token| !token.is_cancelled());
            subscriptions.insert(id, token.clone());
        }
        tracing::debug!(subscription = %id, service = ?name, "Subscribed to service events");
        (id, self.registry.watch(name, token).cancel_on_drop())
    }

    /// Stop a subscription. Returns false if the ID was unknown or the
    /// subscription had already ended.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = {
            let mut subscriptions = self.lock_subscriptions();
            let removed = subscriptions.remove(&id);
            subscriptions.retain(|_, token| !token.is_cancelled());
            removed
        };
        match removed {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                tracing::debug!(subscription = %id, "Unsubscribed from service events");
                true
            }
            _ => false,
        }
    }

    /// Subscriptions that have not ended yet.
    pub fn subscription_count(&self) -> usize {
        let mut subscriptions = self.lock_subscriptions();
        subscriptions.retain(|_, token| !token.is_cancelled());
        subscriptions.len()
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, CancellationToken>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ServiceDiscovery {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
