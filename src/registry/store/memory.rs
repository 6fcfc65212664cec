//! Sharded In-Memory Store
//!
//! A 256-way sharded instance store. Each shard guards its records with its
//! own lock, so writers on different keys rarely contend and every per-key
//! operation is atomic under a single shard write lock.

use crate::domain::{Instance, InstanceKey, InstanceStore, Predicate};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Constants
// =============================================================================

/// Number of shards in the store (256 for good distribution)
pub const STORE_SHARD_COUNT: usize = 256;

// =============================================================================
// Shard Statistics
// =============================================================================

/// Statistics for a single shard
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct ShardStats {
    /// Number of records in shard
    pub record_count: AtomicU64,
    /// Total writes to this shard
    pub write_count: AtomicU64,
}

// =============================================================================
// Store Shard
// =============================================================================

/// A single shard of the store
#[repr(C, align(64))]
pub struct StoreShard {
    records: RwLock<HashMap<InstanceKey, Instance>>,
    stats: ShardStats,
}

impl std::fmt::Debug for StoreShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreShard")
            .field("record_count", &self.stats.record_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl StoreShard {
    fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            stats: ShardStats::default(),
        }
    }

    fn record_count(&self) -> usize {
        self.stats.record_count.load(Ordering::Relaxed) as usize
    }

    fn upsert(&self, key: InstanceKey, instance: Instance) {
        let mut records = self.records.write();
        if records.insert(key, instance).is_none() {
            self.stats.record_count.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.write_count.fetch_add(1, Ordering::Relaxed);
    }

    fn touch(&self, key: &InstanceKey, now: DateTime<Utc>) -> Option<Instance> {
        let mut records = self.records.write();
        let entry = records.get_mut(key)?;
        entry.touch(now);
        self.stats.write_count.fetch_add(1, Ordering::Relaxed);
        Some(entry.clone())
    }

    fn collect_matching(&self, predicate: &Predicate, out: &mut Vec<Instance>) {
        let records = self.records.read();
        out.extend(records.values().filter(|r| predicate.matches(r)).cloned());
    }

    fn remove_matching(&self, predicate: &Predicate, out: &mut Vec<Instance>) {
        let mut records = self.records.write();
        let before = out.len();
        records.retain(|_, record| {
            if predicate.matches(record) {
                out.push(record.clone());
                false
            } else {
                true
            }
        });
        let removed = (out.len() - before) as u64;
        if removed > 0 {
            self.stats.record_count.fetch_sub(removed, Ordering::Relaxed);
            self.stats.write_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self, out: &mut Vec<Instance>) {
        out.extend(self.records.read().values().cloned());
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// Sharded in-memory instance store
pub struct MemoryStore {
    shards: Box<[StoreShard]>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("records", &self.record_count())
            .finish()
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        let shards: Vec<StoreShard> = (0..STORE_SHARD_COUNT).map(|_| StoreShard::new()).collect();
        Self {
            shards: shards.into_boxed_slice(),
        }
    }

    /// Create a store pre-populated with records, keeping their timestamps
    pub fn from_records(records: impl IntoIterator<Item = Instance>) -> Self {
        let store = Self::new();
        for record in records {
            store.put_raw(record);
        }
        store
    }

    #[inline]
    fn shard(&self, key: &InstanceKey) -> &StoreShard {
        &self.shards[key.shard_index(STORE_SHARD_COUNT)]
    }

    /// Insert or replace, stamping heartbeat and health from `now`
    pub fn upsert_sync(&self, mut instance: Instance, now: DateTime<Utc>) -> Instance {
        instance.touch(now);
        let key = instance.key();
        self.shard(&key).upsert(key, instance.clone());
        instance
    }

    pub fn touch_sync(&self, key: &InstanceKey, now: DateTime<Utc>) -> Result<Instance> {
        self.shard(key)
            .touch(key, now)
            .ok_or_else(|| Error::not_found(key.service_name.clone(), key.id.clone()))
    }

    pub fn query_sync(&self, predicate: &Predicate) -> Vec<Instance> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            shard.collect_matching(predicate, &mut out);
        }
        out
    }

    pub fn delete_where_sync(&self, predicate: &Predicate) -> Vec<Instance> {
        let mut removed = Vec::new();
        for shard in self.shards.iter() {
            shard.remove_matching(predicate, &mut removed);
        }
        removed
    }

    /// Insert a record as-is, without restamping its heartbeat
    pub(crate) fn put_raw(&self, instance: Instance) {
        let key = instance.key();
        self.shard(&key).upsert(key, instance);
    }

    /// Remove a single record by key, locking only its shard
    pub fn remove_sync(&self, key: &InstanceKey) -> Option<Instance> {
        let shard = self.shard(key);
        let removed = shard.records.write().remove(key);
        if removed.is_some() {
            shard.stats.record_count.fetch_sub(1, Ordering::Relaxed);
            shard.stats.write_count.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Get a single record by key
    pub fn get(&self, key: &InstanceKey) -> Option<Instance> {
        self.shard(key).records.read().get(key).cloned()
    }

    /// Copy of every record
    pub fn snapshot(&self) -> Vec<Instance> {
        let mut out = Vec::with_capacity(self.record_count());
        for shard in self.shards.iter() {
            shard.snapshot(&mut out);
        }
        out
    }

    pub fn record_count(&self) -> usize {
        self.shards.iter().map(StoreShard::record_count).sum()
    }

    /// Get shard statistics for debugging: (index, records, writes)
    pub fn shard_stats(&self) -> Vec<(usize, usize, u64)> {
        self.shards
            .iter()
            .enumerate()
            .map(|(idx, shard)| {
                (
                    idx,
                    shard.record_count(),
                    shard.stats.write_count.load(Ordering::Relaxed),
                )
            })
            .filter(|(_, count, _)| *count > 0)
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn upsert(&self, instance: Instance, now: DateTime<Utc>) -> Result<Instance> {
        Ok(self.upsert_sync(instance, now))
    }

    async fn touch_heartbeat(&self, key: &InstanceKey, now: DateTime<Utc>) -> Result<Instance> {
        self.touch_sync(key, now)
    }

    async fn query(&self, predicate: &Predicate) -> Result<Vec<Instance>> {
        Ok(self.query_sync(predicate))
    }

    async fn delete_where(&self, predicate: &Predicate) -> Result<Vec<Instance>> {
        Ok(self.delete_where_sync(predicate))
    }

    async fn remove(&self, key: &InstanceKey) -> Result<Option<Instance>> {
        Ok(self.remove_sync(key))
    }

    fn len(&self) -> usize {
        self.record_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Clause, Metadata, Mode};
    use assert_matches::assert_matches;
    use chrono::Duration;
    use std::sync::Arc;

    fn instance(service: &str, id: &str, port: u16) -> Instance {
        Instance {
            service_name: service.into(),
            id: id.into(),
            host: "127.0.0.1".into(),
            port,
            mode: Mode::Dev,
            metadata: Metadata {
                environment: Mode::Dev,
                region: "us-east".into(),
                version: 1,
                developer: None,
                experimental: None,
            },
            health: "DOWN".into(),
            last_heartbeat: DateTime::<Utc>::default(),
        }
    }

    #[test]
    fn test_upsert_overrides_health_and_heartbeat() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let stored = store.upsert_sync(instance("orders", "o1", 8080), now);
        assert_eq!(stored.health, "UP");
        assert_eq!(stored.last_heartbeat, now);
        assert_eq!(store.get(&stored.key()), Some(stored));
        assert_eq!(store.record_count(), 1);
    }

    #[test]
    fn test_upsert_replaces_whole_record() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store.upsert_sync(instance("orders", "o1", 8080), now);
        let mut replacement = instance("orders", "o1", 9090);
        replacement.host = "10.0.0.9".into();
        store.upsert_sync(replacement, now + Duration::seconds(1));

        let stored = store.get(&InstanceKey::new("orders", "o1")).unwrap();
        assert_eq!(stored.port, 9090);
        assert_eq!(stored.host, "10.0.0.9");
        assert_eq!(store.record_count(), 1);
    }

    #[test]
    fn test_touch_unknown_key_is_not_found() {
        let store = MemoryStore::new();
        let key = InstanceKey::new("orders", "missing");

        let result = store.touch_sync(&key, Utc::now());
        assert_matches!(result, Err(Error::InstanceNotFound { .. }));
        assert_eq!(store.record_count(), 0);
    }

    #[test]
    fn test_touch_refreshes_heartbeat() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        let stored = store.upsert_sync(instance("orders", "o1", 8080), t0);

        let t1 = t0 + Duration::seconds(5);
        let touched = store.touch_sync(&stored.key(), t1).unwrap();
        assert_eq!(touched.last_heartbeat, t1);
        assert_eq!(touched.port, 8080);
    }

    #[tokio::test]
    async fn test_remove_by_key() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.upsert_sync(instance("orders", "o1", 1), now);
        store.upsert_sync(instance("orders", "o2", 2), now);

        let key = InstanceKey::new("orders", "o1");
        let removed = store.remove(&key).await.unwrap();
        assert_eq!(removed.map(|r| r.port), Some(1));
        assert_eq!(store.remove(&key).await.unwrap(), None);
        assert_eq!(store.record_count(), 1);
        assert!(store.get(&InstanceKey::new("orders", "o2")).is_some());
    }

    #[test]
    fn test_delete_where_cutoff() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        store.upsert_sync(instance("orders", "old", 1), t0);
        store.upsert_sync(instance("orders", "edge", 2), t0 + Duration::seconds(10));
        store.upsert_sync(instance("orders", "new", 3), t0 + Duration::seconds(20));

        let cutoff = t0 + Duration::seconds(10);
        let removed = store.delete_where_sync(&Predicate::stale_before(cutoff));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "old");

        let remaining = store.query_sync(&Predicate::all());
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| r.last_heartbeat >= cutoff));

        // zero matches is a no-op
        assert!(store.delete_where_sync(&Predicate::stale_before(cutoff)).is_empty());
        assert_eq!(store.record_count(), 2);
    }

    #[test]
    fn test_query_filters() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.upsert_sync(instance("orders", "o1", 1), now);
        store.upsert_sync(instance("orders", "o2", 2), now);
        store.upsert_sync(instance("billing", "b1", 3), now);

        let orders = store.query_sync(&Predicate::all().and(Clause::ServiceName("orders".into())));
        assert_eq!(orders.len(), 2);

        let one = store.query_sync(&Predicate::key(&InstanceKey::new("billing", "b1")));
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].port, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_same_key() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();

        for port in 1..=64u16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut inst = instance("orders", "o1", port);
                inst.host = format!("host-{}", port);
                store.upsert(inst, Utc::now()).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let records = store.query_sync(&Predicate::all());
        assert_eq!(records.len(), 1);
        // host and port always come from the same write
        assert_eq!(records[0].host, format!("host-{}", records[0].port));
    }

    #[test]
    fn test_from_records_keeps_timestamps() {
        let t0 = Utc::now() - Duration::hours(1);
        let mut record = instance("orders", "o1", 1);
        record.touch(t0);

        let store = MemoryStore::from_records(vec![record.clone()]);
        assert_eq!(store.get(&record.key()).unwrap().last_heartbeat, t0);
        assert_eq!(store.shard_stats().len(), 1);
    }
}
