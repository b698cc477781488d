//! Background maintenance loops.
//!
//! Each loop ticks on its own interval and exits on the shutdown broadcast.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::discovery::InMemoryRegistry;
use crate::security::RateLimiterRegistry;

/// Drop idle limiter keys every `interval`.
pub fn spawn_limiter_sweeper(
    limiter: Arc<RateLimiterRegistry>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(run_every("limiter sweeper", interval, shutdown, move || {
        let removed = limiter.sweep();
        if removed > 0 {
            tracing::debug!(removed, remaining = limiter.len(), "Swept idle rate limit entries");
        }
    }))
}

/// Remove instances whose heartbeat TTL elapsed every `interval`.
pub fn spawn_registry_reaper(
    registry: Arc<InMemoryRegistry>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(run_every("registry reaper", interval, shutdown, move || {
        if let Err(e) = registry.reap_expired() {
            tracing::warn!(error = %e, "Registry reap failed");
        }
    }))
}

async fn run_every<F>(
    name: &'static str,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut tick: F,
) where
    F: FnMut() + Send + 'static,
{
    tracing::info!(task = name, interval = ?interval, "Maintenance task starting");
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => tick(),
            _ = shutdown.recv() => {
                tracing::info!(task = name, "Maintenance task received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::discovery::{ServiceInstance, ServiceRegistry};
    use crate::lifecycle::Shutdown;
    use crate::security::{LimitPolicy, Scope};

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_shutdown() {
        let limiter = Arc::new(RateLimiterRegistry::new(RateLimitConfig {
            ip: Some(LimitPolicy::SlidingWindow {
                limit: 5,
                window: Duration::from_secs(1),
            }),
            idle_ttl: Duration::from_millis(1),
            ..RateLimitConfig::default()
        }));
        limiter.allow(Scope::Ip, "a");

        let shutdown = Shutdown::new();
        let handle = spawn_limiter_sweeper(limiter.clone(), Duration::from_secs(1), shutdown.subscribe());
        shutdown.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_reaper_removes_expired() {
        let registry = Arc::new(InMemoryRegistry::new(Duration::from_millis(20)));
        registry
            .register(ServiceInstance::new("orders", "10.0.0.1", 80))
            .unwrap();

        let shutdown = Shutdown::new();
        let handle = spawn_registry_reaper(registry.clone(), Duration::from_millis(10), shutdown.subscribe());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.list_all_services().unwrap().is_empty());

        shutdown.trigger();
        handle.await.unwrap();
    }
}
