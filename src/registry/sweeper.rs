//! Liveness Sweeper
//!
//! Background task that periodically evicts instances whose heartbeat has
//! expired. A failed sweep is logged and the next tick tries again.

use crate::registry::service::Registry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for the sweeper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Seconds between sweeps
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Periodic stale-instance evictor
pub struct Sweeper {
    config: SweeperConfig,
    registry: Arc<Registry>,
}

impl Sweeper {
    pub fn new(config: SweeperConfig, registry: Arc<Registry>) -> Self {
        Self { config, registry }
    }

    /// Run a single sweep, returning how many instances were evicted
    ///
    /// Failures are logged and counted, never propagated.
    pub async fn sweep_once(&self) -> usize {
        match self.registry.sweep().await {
            Ok(evicted) => evicted,
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "Liveness sweep failed");
                self.registry.record_sweep_failure();
                0
            }
        }
    }

    /// Sweep on every tick until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        info!(
            interval_secs = self.config.interval().as_secs(),
            ttl_secs = self.registry.config().heartbeat_ttl_secs,
            "Liveness sweeper started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.sweep_once().await;
                    debug!(evicted, "Sweep tick complete");
                }
            }
        }

        info!("Liveness sweeper stopped");
    }

    /// Spawn the sweep loop on the runtime
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Clock, Instance, InstanceKey, InstanceStore, ManualClock, Metadata, Mode, Predicate,
    };
    use crate::error::{Error, Result};
    use crate::registry::hub::{EventHub, HubConfig};
    use crate::registry::metrics::RegistryMetrics;
    use crate::registry::service::RegistryConfig;
    use crate::registry::store::MemoryStore;
    use crate::registry::events::EventAction;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    fn instance(id: &str) -> Instance {
        Instance {
            service_name: "order-service".into(),
            id: id.into(),
            host: "127.0.0.1".into(),
            port: 8080,
            mode: Mode::Dev,
            metadata: Metadata {
                environment: Mode::Dev,
                region: "us-east".into(),
                version: 1,
                developer: None,
                experimental: None,
            },
            health: String::new(),
            last_heartbeat: Default::default(),
        }
    }

    fn registry_with(store: Arc<dyn InstanceStore>, clock: Arc<dyn Clock>) -> Arc<Registry> {
        Registry::new(
            RegistryConfig::default(),
            store,
            EventHub::new(HubConfig::default()),
            clock,
            RegistryMetrics::new().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_sweep_once_eviction_boundary() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(store.clone(), clock.clone());
        let sweeper = Sweeper::new(SweeperConfig::default(), registry.clone());

        registry.register_instance(instance("old")).await.unwrap();
        clock.advance(chrono::Duration::seconds(5));
        registry.register_instance(instance("young")).await.unwrap();

        // "old" is exactly at the TTL: still alive
        clock.advance(chrono::Duration::seconds(25));
        assert_eq!(sweeper.sweep_once().await, 0);

        clock.advance(chrono::Duration::milliseconds(1));
        assert_eq!(sweeper.sweep_once().await, 1);
        assert!(store.get(&InstanceKey::new("order-service", "old")).is_none());
        assert!(store.get(&InstanceKey::new("order-service", "young")).is_some());
    }

    #[tokio::test]
    async fn test_sweep_emits_deregister_events() {
        let clock = Arc::new(ManualClock::default());
        let registry = registry_with(Arc::new(MemoryStore::new()), clock.clone());
        let sweeper = Sweeper::new(SweeperConfig::default(), registry.clone());

        registry.register_instance(instance("o1")).await.unwrap();
        let mut sub = registry.subscribe();

        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(sweeper.sweep_once().await, 1);

        let event = sub.receiver.recv().await.unwrap();
        assert_eq!(event.action, EventAction::Deregister);
        assert_eq!(event.service.id, "o1");
    }

    struct BrokenStore;

    #[async_trait]
    impl InstanceStore for BrokenStore {
        async fn upsert(&self, _: Instance, _: DateTime<Utc>) -> Result<Instance> {
            Err(Error::Store("disk gone".into()))
        }

        async fn touch_heartbeat(&self, _: &InstanceKey, _: DateTime<Utc>) -> Result<Instance> {
            Err(Error::Store("disk gone".into()))
        }

        async fn query(&self, _: &Predicate) -> Result<Vec<Instance>> {
            Err(Error::Store("disk gone".into()))
        }

        async fn delete_where(&self, _: &Predicate) -> Result<Vec<Instance>> {
            Err(Error::Store("disk gone".into()))
        }

        async fn remove(&self, _: &InstanceKey) -> Result<Option<Instance>> {
            Err(Error::Store("disk gone".into()))
        }

        fn len(&self) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn test_failed_sweep_is_counted_not_propagated() {
        let registry = registry_with(Arc::new(BrokenStore), Arc::new(ManualClock::default()));
        let sweeper = Sweeper::new(SweeperConfig::default(), registry.clone());

        assert_eq!(sweeper.sweep_once().await, 0);
        assert_eq!(sweeper.sweep_once().await, 0);
        assert_eq!(registry.metrics().sweep_failures.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(store.clone(), clock.clone());
        registry.register_instance(instance("o1")).await.unwrap();
        clock.advance(chrono::Duration::seconds(60));

        let cancel = CancellationToken::new();
        let handle = Sweeper::new(SweeperConfig { interval_secs: 1 }, registry).spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.record_count(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
