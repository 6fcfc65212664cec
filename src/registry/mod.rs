//! Registry Module
//!
//! The registry engine: instance stores, lookup filters, the event fan-out
//! hub, the liveness sweeper and the service that ties them together.

pub mod events;
pub mod filter;
pub mod hub;
pub mod metrics;
pub mod service;
pub mod store;
pub mod sweeper;

pub use events::{EventAction, RegistryEvent};
pub use filter::{LookupFilter, MODE_PARAM, SERVICE_PARAM};
pub use hub::{BroadcastReport, EventHub, HubConfig, SubscriberId, Subscription};
pub use metrics::RegistryMetrics;
pub use service::{Registry, RegistryConfig, RegistryStats};
pub use store::{FileStore, MemoryStore, STORE_SHARD_COUNT};
pub use sweeper::{Sweeper, SweeperConfig};
