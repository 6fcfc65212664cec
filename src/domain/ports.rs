//! Domain Ports - Core trait definitions for the service registry
//!
//! These traits define the boundaries between the registry engine and the
//! systems it depends on. Adapters implement them to provide concrete
//! storage and time sources.

use crate::domain::instance::{Instance, InstanceKey};
use crate::domain::predicate::Predicate;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

// =============================================================================
// Instance Store
// =============================================================================

/// Keyed collection of instance records
///
/// Implementations must make `upsert` and `touch_heartbeat` atomic per key,
/// and `delete_where` atomic per record: a concurrent heartbeat and delete on
/// the same key resolve to exactly one of "record survives" or "record gone".
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Insert or fully replace the record for `instance.key()`
    ///
    /// `lastHeartbeat` and `health` are always set from `now`, whatever the
    /// caller supplied. Returns the stored record.
    async fn upsert(&self, instance: Instance, now: DateTime<Utc>) -> Result<Instance>;

    /// Refresh the heartbeat of an existing record
    ///
    /// Fails with `InstanceNotFound` and leaves the store untouched when no
    /// record has this key.
    async fn touch_heartbeat(&self, key: &InstanceKey, now: DateTime<Utc>) -> Result<Instance>;

    /// All records matching the predicate, in no particular order
    async fn query(&self, predicate: &Predicate) -> Result<Vec<Instance>>;

    /// Remove every record matching the predicate and return what was removed
    async fn delete_where(&self, predicate: &Predicate) -> Result<Vec<Instance>>;

    /// Remove the record with this key, if any
    async fn remove(&self, key: &InstanceKey) -> Result<Option<Instance>>;

    /// Number of stored records
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Clock
// =============================================================================

/// Source of the current time for heartbeats and liveness cutoffs
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
