//! Registry Service
//!
//! Binds register, heartbeat, deregister, lookup and sweep onto the instance
//! store and the event hub. Transport adapters talk only to this type.
//!
//! Every successful mutation is followed by a broadcast. The broadcast is
//! best-effort: its outcome feeds metrics and never changes the result
//! returned to the caller.

use crate::domain::{Clock, Instance, InstanceKey, InstanceStore, Predicate, RegisterRequest};
use crate::error::{Error, Result};
use crate::registry::events::{EventAction, RegistryEvent};
use crate::registry::filter::LookupFilter;
use crate::registry::hub::{EventHub, Subscription, SubscriberId};
use crate::registry::metrics::RegistryMetrics;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Configuration
// =============================================================================

/// Upper bound on the TTL so `now - ttl` stays representable
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Configuration for the registry service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum gap since the last heartbeat before an instance counts as dead
    pub heartbeat_ttl_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_ttl_secs: 30,
        }
    }
}

impl RegistryConfig {
    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::seconds(self.heartbeat_ttl_secs.min(MAX_TTL_SECS) as i64)
    }
}

/// Point-in-time registry statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub instances: usize,
    pub subscribers: usize,
}

// =============================================================================
// Registry
// =============================================================================

/// The registry engine
pub struct Registry {
    config: RegistryConfig,
    store: Arc<dyn InstanceStore>,
    hub: Arc<EventHub>,
    clock: Arc<dyn Clock>,
    metrics: RegistryMetrics,
}

impl Registry {
    /// Create a new registry service
    pub fn new(
        config: RegistryConfig,
        store: Arc<dyn InstanceStore>,
        hub: Arc<EventHub>,
        clock: Arc<dyn Clock>,
        metrics: RegistryMetrics,
    ) -> Arc<Self> {
        metrics.instances.set(store.len() as i64);
        Arc::new(Self {
            config,
            store,
            hub,
            clock,
            metrics,
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn metrics(&self) -> &RegistryMetrics {
        &self.metrics
    }

    /// Validate and register an instance from a wire payload
    pub async fn register(&self, request: RegisterRequest) -> Result<Instance> {
        let instance = request.into_instance()?;
        self.register_instance(instance).await
    }

    /// Register (or fully replace) an instance
    pub async fn register_instance(&self, instance: Instance) -> Result<Instance> {
        instance.validate()?;

        let stored = self.store.upsert(instance, self.clock.now()).await?;
        info!(
            service = %stored.service_name,
            id = %stored.id,
            host = %stored.host,
            port = stored.port,
            "Instance registered"
        );

        self.publish(RegistryEvent::register(stored.clone()));
        Ok(stored)
    }

    /// Refresh the heartbeat of a registered instance
    pub async fn heartbeat(&self, key: &InstanceKey) -> Result<Instance> {
        key.validate()?;

        let touched = self.store.touch_heartbeat(key, self.clock.now()).await?;
        debug!(key = %key, "Heartbeat received");

        self.publish(RegistryEvent::heartbeat(touched.clone()));
        Ok(touched)
    }

    /// Remove an instance explicitly
    pub async fn deregister(&self, key: &InstanceKey) -> Result<Instance> {
        key.validate()?;

        let removed = self
            .store
            .remove(key)
            .await?
            .ok_or_else(|| Error::not_found(key.service_name.clone(), key.id.clone()))?;
        info!(key = %key, "Instance deregistered");

        self.publish(RegistryEvent::deregister(removed.clone()));
        Ok(removed)
    }

    /// Alive instances matching the filter
    pub async fn lookup(&self, filter: LookupFilter) -> Result<Vec<Instance>> {
        self.find(filter.alive_only(true)).await
    }

    /// Instances matching the filter, honouring its `alive_only` flag
    pub async fn find(&self, filter: LookupFilter) -> Result<Vec<Instance>> {
        let predicate = filter.to_predicate(self.clock.now(), self.config.heartbeat_ttl());
        let instances = self.store.query(&predicate).await?;
        self.metrics.lookups.inc();
        debug!(matched = instances.len(), ?filter, "Lookup served");
        Ok(instances)
    }

    /// Evict every instance whose heartbeat is older than the TTL
    ///
    /// Emits one deregister event per evicted instance and returns how many
    /// were evicted.
    pub async fn sweep(&self) -> Result<usize> {
        let cutoff = self.clock.now() - self.config.heartbeat_ttl();
        let removed = self.store.delete_where(&Predicate::stale_before(cutoff)).await?;
        let count = removed.len();

        for instance in removed {
            debug!(key = %instance.key(), last_heartbeat = %instance.last_heartbeat, "Evicting stale instance");
            self.publish(RegistryEvent::deregister(instance));
        }
        if count > 0 {
            self.metrics.evictions.inc_by(count as u64);
            info!(evicted = count, %cutoff, "Liveness sweep evicted stale instances");
        }
        self.metrics.instances.set(self.store.len() as i64);
        Ok(count)
    }

    /// Record a failed sweep
    pub(crate) fn record_sweep_failure(&self) {
        self.metrics.sweep_failures.inc();
    }

    /// Start watching registry events
    pub fn subscribe(&self) -> Subscription {
        let subscription = self.hub.subscribe();
        self.metrics.subscribers.set(self.hub.subscriber_count() as i64);
        subscription
    }

    /// Stop watching registry events
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.hub.unsubscribe(id);
        self.metrics.subscribers.set(self.hub.subscriber_count() as i64);
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            instances: self.store.len(),
            subscribers: self.hub.subscriber_count(),
        }
    }

    /// Drop all subscribers so their connections wind down
    pub fn shutdown(&self) {
        self.hub.close();
        self.metrics.subscribers.set(0);
    }

    fn publish(&self, event: RegistryEvent) {
        let action: EventAction = event.action;
        let report = self.hub.broadcast(event);

        self.metrics.record_mutation(action);
        self.metrics.record_broadcast(&report);
        self.metrics.instances.set(self.store.len() as i64);
        self.metrics.subscribers.set(self.hub.subscriber_count() as i64);
    }
}
