//! Service registry: instance storage, TTL health, change notifications.
//!
//! # Responsibilities
//! - Store instances by ID, keyed registration and deregistration
//! - Track heartbeats; an instance past its TTL is unhealthy
//! - Broadcast Added / Removed / Updated events to watchers
//!
//! # Design Decisions
//! - The trait is synchronous; the in-memory backend never blocks on IO
//! - Healthy sets are returned sorted by ID so rotation order is stable
//! - Expired instances are excluded at read time and removed by the reaper

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::discovery::instance::{InstanceStatus, ServiceInstance};
use crate::error::{GatewayError, Result};
use crate::observability::metrics;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Membership change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "instance", rename_all = "snake_case")]
pub enum ServiceEvent {
    Added(ServiceInstance),
    Removed(ServiceInstance),
    Updated(ServiceInstance),
}

impl ServiceEvent {
    pub fn instance(&self) -> &ServiceInstance {
        match self {
            ServiceEvent::Added(i) | ServiceEvent::Removed(i) | ServiceEvent::Updated(i) => i,
        }
    }
}

/// Pluggable registry backend.
pub trait ServiceRegistry: Send + Sync {
    /// Store `instance`, assigning an ID when empty. Returns the stored copy.
    fn register(&self, instance: ServiceInstance) -> Result<ServiceInstance>;

    fn deregister(&self, id: &str) -> Result<ServiceInstance>;

    /// Refresh the TTL of an instance.
    fn heartbeat(&self, id: &str) -> Result<()>;

    fn set_status(&self, id: &str, status: InstanceStatus) -> Result<()>;

    /// Active, unexpired instances of `name`, sorted by ID.
    fn healthy_services(&self, name: &str) -> Result<Vec<Arc<ServiceInstance>>>;

    /// Active, unexpired instances of every service.
    fn all_healthy(&self) -> Result<Vec<Arc<ServiceInstance>>>;

    /// Every instance regardless of health.
    fn list_all_services(&self) -> Result<Vec<ServiceInstance>>;

    /// Event stream for `name` (or every service when `None`) that ends when
    /// `cancel` fires.
    fn watch(&self, name: Option<&str>, cancel: CancellationToken) -> ServiceWatch;
}

/// Receiving half of a registry watch.
pub struct ServiceWatch {
    rx: broadcast::Receiver<ServiceEvent>,
    name: Option<String>,
    cancel: CancellationToken,
    _guard: Option<DropGuard>,
}

impl ServiceWatch {
    pub fn new(
        rx: broadcast::Receiver<ServiceEvent>,
        name: Option<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rx,
            name,
            cancel,
            _guard: None,
        }
    }

    /// Cancel the watch's token when the watch is dropped. Only for tokens
    /// the watch owns exclusively.
    pub fn cancel_on_drop(mut self) -> Self {
        self._guard = Some(self.cancel.clone().drop_guard());
        self
    }

    /// Next matching event; `None` once cancelled or the registry is gone.
    pub async fn recv(&mut self) -> Option<ServiceEvent> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                received = self.rx.recv() => match received {
                    Ok(event) => {
                        let wanted = self
                            .name
                            .as_deref()
                            .map_or(true, |name| event.instance().name == name);
                        if wanted {
                            return Some(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            service = ?self.name,
                            skipped,
                            "Service watcher lagged, events dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Process-local registry backend.
pub struct InMemoryRegistry {
    instances: RwLock<HashMap<String, Arc<ServiceInstance>>>,
    events: broadcast::Sender<ServiceEvent>,
    ttl: Duration,
}

impl InMemoryRegistry {
    /// `ttl` of zero disables heartbeat expiry.
    pub fn new(ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            instances: RwLock::new(HashMap::new()),
            events,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Remove every instance whose heartbeat is older than the TTL.
    pub fn reap_expired(&self) -> Result<Vec<ServiceInstance>> {
        self.reap_expired_at(SystemTime::now())
    }

    pub(crate) fn reap_expired_at(&self, now: SystemTime) -> Result<Vec<ServiceInstance>> {
        let removed: Vec<ServiceInstance> = {
            let mut instances = self.write()?;
            let expired: Vec<String> = instances
                .values()
                .filter(|i| i.is_expired_at(self.ttl, now))
                .map(|i| i.id.clone())
                .collect();
            let removed = expired
                .iter()
                .filter_map(|id| instances.remove(id))
                .map(|i| (*i).clone())
                .collect();
            metrics::record_registry_size(instances.len());
            removed
        };
        for instance in &removed {
            tracing::info!(
                instance_id = %instance.id,
                service = %instance.name,
                "Instance expired, removing"
            );
            self.publish(ServiceEvent::Removed(instance.clone()));
        }
        Ok(removed)
    }

    pub(crate) fn healthy_services_at(
        &self,
        name: &str,
        now: SystemTime,
    ) -> Result<Vec<Arc<ServiceInstance>>> {
        self.healthy_where(now, |i| i.name == name)
    }

    fn healthy_where(
        &self,
        now: SystemTime,
        filter: impl Fn(&ServiceInstance) -> bool,
    ) -> Result<Vec<Arc<ServiceInstance>>> {
        let instances = self.read()?;
        let mut healthy: Vec<Arc<ServiceInstance>> = instances
            .values()
            .filter(|i| {
                let instance: &ServiceInstance = i;
                filter(instance) && instance.is_healthy_at(self.ttl, now)
            })
            .cloned()
            .collect();
        healthy.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(healthy)
    }

    pub(crate) fn heartbeat_at(&self, id: &str, now: SystemTime) -> Result<()> {
        let mut instances = self.write()?;
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| GatewayError::InstanceNotFound(id.to_string()))?;
        Arc::make_mut(instance).last_heartbeat = now;
        tracing::trace!(instance_id = %id, "Heartbeat");
        Ok(())
    }

    fn publish(&self, event: ServiceEvent) {
        // No receivers is not an error.
        let _ = self.events.send(event);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Arc<ServiceInstance>>>> {
        self.instances
            .read()
            .map_err(|_| GatewayError::RegistryUnavailable("instance table lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Arc<ServiceInstance>>>> {
        self.instances
            .write()
            .map_err(|_| GatewayError::RegistryUnavailable("instance table lock poisoned".into()))
    }
}

impl ServiceRegistry for InMemoryRegistry {
    fn register(&self, mut instance: ServiceInstance) -> Result<ServiceInstance> {
        instance.validate()?;
        if instance.id.trim().is_empty() {
            instance.id = Uuid::new_v4().to_string();
        }
        instance.last_heartbeat = SystemTime::now();

        let replaced = {
            let mut instances = self.write()?;
            let replaced = instances
                .insert(instance.id.clone(), Arc::new(instance.clone()))
                .is_some();
            metrics::record_registry_size(instances.len());
            replaced
        };

        tracing::info!(
            instance_id = %instance.id,
            service = %instance.name,
            endpoint = %instance.endpoint(),
            weight = instance.weight,
            replaced,
            "Instance registered"
        );
        if replaced {
            self.publish(ServiceEvent::Updated(instance.clone()));
        } else {
            self.publish(ServiceEvent::Added(instance.clone()));
        }
        Ok(instance)
    }

    fn deregister(&self, id: &str) -> Result<ServiceInstance> {
        let removed = {
            let mut instances = self.write()?;
            let removed = instances
                .remove(id)
                .ok_or_else(|| GatewayError::InstanceNotFound(id.to_string()))?;
            metrics::record_registry_size(instances.len());
            (*removed).clone()
        };
        tracing::info!(instance_id = %id, service = %removed.name, "Instance deregistered");
        self.publish(ServiceEvent::Removed(removed.clone()));
        Ok(removed)
    }

    fn heartbeat(&self, id: &str) -> Result<()> {
        self.heartbeat_at(id, SystemTime::now())
    }

    fn set_status(&self, id: &str, status: InstanceStatus) -> Result<()> {
        let updated = {
            let mut instances = self.write()?;
            let instance = instances
                .get_mut(id)
                .ok_or_else(|| GatewayError::InstanceNotFound(id.to_string()))?;
            if instance.status == status {
                return Ok(());
            }
            Arc::make_mut(instance).status = status;
            (**instance).clone()
        };
        tracing::info!(instance_id = %id, service = %updated.name, %status, "Instance status changed");
        self.publish(ServiceEvent::Updated(updated));
        Ok(())
    }

    fn healthy_services(&self, name: &str) -> Result<Vec<Arc<ServiceInstance>>> {
        self.healthy_services_at(name, SystemTime::now())
    }

    fn all_healthy(&self) -> Result<Vec<Arc<ServiceInstance>>> {
        self.healthy_where(SystemTime::now(), |_| true)
    }

    fn list_all_services(&self) -> Result<Vec<ServiceInstance>> {
        let instances = self.read()?;
        let mut all: Vec<ServiceInstance> = instances.values().map(|i| (**i).clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    fn watch(&self, name: Option<&str>, cancel: CancellationToken) -> ServiceWatch {
        ServiceWatch::new(self.events.subscribe(), name.map(str::to_string), cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> InMemoryRegistry {
        InMemoryRegistry::new(Duration::from_secs(30))
    }

    fn orders(id: &str) -> ServiceInstance {
        ServiceInstance::new("orders", "10.0.0.1", 8080).with_id(id)
    }

    #[test]
    fn test_register_assigns_id() {
        let reg = registry();
        let stored = reg
            .register(ServiceInstance::new("orders", "10.0.0.1", 8080))
            .unwrap();
        assert!(Uuid::parse_str(&stored.id).is_ok());
        assert_eq!(reg.list_all_services().unwrap().len(), 1);
    }

    #[test]
    fn test_register_rejects_invalid() {
        let reg = registry();
        let err = reg
            .register(ServiceInstance::new("orders", "10.0.0.1", 0))
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInstance(_)));
    }

    #[test]
    fn test_healthy_excludes_inactive_and_expired() {
        let reg = registry();
        reg.register(orders("a")).unwrap();
        reg.register(orders("b")).unwrap();
        reg.register(orders("c")).unwrap();
        reg.register(ServiceInstance::new("users", "10.0.0.2", 80).with_id("u")).unwrap();
        reg.set_status("b", InstanceStatus::Draining).unwrap();

        let now = SystemTime::now();
        let ids: Vec<String> = reg
            .healthy_services_at("orders", now)
            .unwrap()
            .iter()
            .map(|i| i.id.clone())
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);

        reg.heartbeat_at("a", now + Duration::from_secs(40)).unwrap();
        let later: Vec<String> = reg
            .healthy_services_at("orders", now + Duration::from_secs(45))
            .unwrap()
            .iter()
            .map(|i| i.id.clone())
            .collect();
        assert_eq!(later, vec!["a".to_string()]);
    }

    #[test]
    fn test_heartbeat_and_deregister_unknown() {
        let reg = registry();
        assert!(matches!(reg.heartbeat("ghost"), Err(GatewayError::InstanceNotFound(_))));
        assert!(matches!(reg.deregister("ghost"), Err(GatewayError::InstanceNotFound(_))));
    }

    #[test]
    fn test_reap_expired() {
        let reg = registry();
        reg.register(orders("a")).unwrap();
        reg.register(orders("b")).unwrap();
        let now = SystemTime::now();
        reg.heartbeat_at("b", now + Duration::from_secs(50)).unwrap();

        let removed = reg.reap_expired_at(now + Duration::from_secs(60)).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "a");
        assert_eq!(reg.list_all_services().unwrap().len(), 1);
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let reg = InMemoryRegistry::new(Duration::ZERO);
        reg.register(orders("a")).unwrap();
        let far = SystemTime::now() + Duration::from_secs(86_400);
        assert_eq!(reg.healthy_services_at("orders", far).unwrap().len(), 1);
        assert!(reg.reap_expired_at(far).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_receives_filtered_events() {
        let reg = registry();
        let cancel = CancellationToken::new();
        let mut watch = reg.watch(Some("orders"), cancel.clone());

        reg.register(ServiceInstance::new("users", "10.0.0.2", 80).with_id("u")).unwrap();
        reg.register(orders("a")).unwrap();
        reg.register(orders("a").with_weight(3)).unwrap();
        reg.deregister("a").unwrap();

        assert!(matches!(watch.recv().await, Some(ServiceEvent::Added(i)) if i.id == "a"));
        assert!(matches!(watch.recv().await, Some(ServiceEvent::Updated(i)) if i.weight == 3));
        assert!(matches!(watch.recv().await, Some(ServiceEvent::Removed(i)) if i.id == "a"));
    }

    #[tokio::test]
    async fn test_watch_ends_on_cancel() {
        let reg = registry();
        let cancel = CancellationToken::new();
        let mut watch = reg.watch(None, cancel.clone());
        let waiter = tokio::spawn(async move { watch.recv().await });
        cancel.cancel();
        assert!(waiter.await.unwrap().is_none());
    }
}
