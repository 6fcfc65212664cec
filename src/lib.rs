//! Service Registry
//!
//! A service-discovery directory: instances register themselves, prove
//! liveness with periodic heartbeats and are found by their peers through
//! filtered lookups. Watchers receive every change over a WebSocket.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │              REST + WebSocket API (axum)   Metrics (hyper)       │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┴──────────────────────────────────┐
//! │                         Registry Service                         │
//! │   register / heartbeat / deregister / lookup / sweep / watch     │
//! ├──────────────────┬───────────────────────┬───────────────────────┤
//! │  Instance Store  │    Liveness Sweeper   │     Event Hub         │
//! │  (256-way        │    (TTL eviction)     │  (bounded fan-out)    │
//! │   sharded, file) │                       │                       │
//! └──────────────────┴───────────────────────┴───────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`registry`]: Stores, filters, fan-out hub, sweeper and the registry service
//! - [`api`]: HTTP and WebSocket transport
//! - [`client`]: Client for registering services
//! - [`config`]: Process configuration
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod api;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod registry;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, RestRouter};

pub use client::{ClientConfig, HeartbeatHandle, LookupQuery, RegistryClient};

pub use config::{Settings, SettingsOverrides};

pub use domain::{
    Clock, Instance, InstanceKey, InstanceStore, ManualClock, Metadata, Mode, Predicate,
    RegisterRequest, SystemClock,
};

pub use error::{Error, Result};

pub use registry::{
    EventAction, EventHub, FileStore, HubConfig, LookupFilter, MemoryStore, Registry,
    RegistryConfig, RegistryEvent, RegistryMetrics, RegistryStats, Sweeper, SweeperConfig,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
