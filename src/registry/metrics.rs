//! Registry Metrics
//!
//! Prometheus counters and gauges for the registry engine. The metrics live
//! in their own `prometheus::Registry` so several engines (tests, embedded
//! use) never collide on the global default registry.

use crate::error::{Error, Result};
use crate::registry::events::EventAction;
use crate::registry::hub::BroadcastReport;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Metric handles for one registry engine
#[derive(Clone)]
pub struct RegistryMetrics {
    registry: Registry,
    /// Mutations by action (register, heartbeat, deregister)
    pub mutations: IntCounterVec,
    /// Instances removed by the liveness sweep
    pub evictions: IntCounter,
    /// Sweeps that failed
    pub sweep_failures: IntCounter,
    /// Lookups served
    pub lookups: IntCounter,
    /// Events accepted by subscriber queues
    pub deliveries: IntCounter,
    /// Subscribers dropped for failed delivery
    pub dropped_subscribers: IntCounter,
    /// Stored instances
    pub instances: IntGauge,
    /// Live subscribers
    pub subscribers: IntGauge,
}

fn register<C: prometheus::core::Collector + Clone + 'static>(
    registry: &Registry,
    collector: C,
) -> Result<C> {
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| Error::Internal(format!("metric registration failed: {}", e)))?;
    Ok(collector)
}

fn prom(e: prometheus::Error) -> Error {
    Error::Internal(format!("metric creation failed: {}", e))
}

impl RegistryMetrics {
    /// Create and register all registry metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("service_registry".into()), None).map_err(prom)?;

        let mutations = register(
            &registry,
            IntCounterVec::new(
                Opts::new("mutations_total", "Registry mutations by action"),
                &["action"],
            )
            .map_err(prom)?,
        )?;
        let evictions = register(
            &registry,
            IntCounter::new("evictions_total", "Instances evicted by the liveness sweep")
                .map_err(prom)?,
        )?;
        let sweep_failures = register(
            &registry,
            IntCounter::new("sweep_failures_total", "Liveness sweeps that failed").map_err(prom)?,
        )?;
        let lookups = register(
            &registry,
            IntCounter::new("lookups_total", "Lookups served").map_err(prom)?,
        )?;
        let deliveries = register(
            &registry,
            IntCounter::new("event_deliveries_total", "Events accepted by subscriber queues")
                .map_err(prom)?,
        )?;
        let dropped_subscribers = register(
            &registry,
            IntCounter::new(
                "dropped_subscribers_total",
                "Subscribers dropped after failed delivery",
            )
            .map_err(prom)?,
        )?;
        let instances = register(
            &registry,
            IntGauge::new("instances", "Instances currently stored").map_err(prom)?,
        )?;
        let subscribers = register(
            &registry,
            IntGauge::new("subscribers", "Live event subscribers").map_err(prom)?,
        )?;

        Ok(Self {
            registry,
            mutations,
            evictions,
            sweep_failures,
            lookups,
            deliveries,
            dropped_subscribers,
            instances,
            subscribers,
        })
    }

    pub fn record_mutation(&self, action: EventAction) {
        self.mutations.with_label_values(&[action.as_str()]).inc();
    }

    pub fn record_broadcast(&self, report: &BroadcastReport) {
        self.deliveries.inc_by(report.delivered as u64);
        self.dropped_subscribers.inc_by(report.dropped as u64);
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("metric encoding failed: {}", e)))?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

impl std::fmt::Debug for RegistryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryMetrics")
            .field("instances", &self.instances.get())
            .field("subscribers", &self.subscribers.get())
            .finish()
    }
}
