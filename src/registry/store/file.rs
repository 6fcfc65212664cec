//! File-Backed Store
//!
//! Keeps the working set in a [`MemoryStore`] and persists a JSON snapshot of
//! the whole collection after every mutation. A mutation is staged into the
//! next snapshot first and applied to the working set only once that
//! snapshot is on disk, so readers never see a change that later fails to
//! persist. Snapshots are written to a temporary file and renamed over the
//! target, so a crash mid-write leaves the previous snapshot intact.

use crate::domain::{Instance, InstanceKey, InstanceStore, Predicate};
use crate::error::{Error, Result};
use crate::registry::store::MemoryStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Snapshot format version
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    instances: Vec<Instance>,
}

fn store_io(path: &Path, op: &str, e: std::io::Error) -> Error {
    Error::Store(format!("{} {}: {}", op, path.display(), e))
}

// =============================================================================
// File Store
// =============================================================================

/// Instance store persisted to a JSON snapshot file
pub struct FileStore {
    inner: MemoryStore,
    path: PathBuf,
    /// Serializes mutate-then-persist so snapshots never interleave
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("records", &self.inner.record_count())
            .finish()
    }
}

impl FileStore {
    /// Open the store, loading an existing snapshot if there is one
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| store_io(parent, "create", e))?;
        }

        let records = match fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Store(format!("corrupt snapshot {}: {}", path.display(), e))
                })?;
                if snapshot.version != SNAPSHOT_VERSION {
                    return Err(Error::Store(format!(
                        "unsupported snapshot version {} in {}",
                        snapshot.version,
                        path.display()
                    )));
                }
                snapshot.instances
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(store_io(&path, "read", e)),
        };

        info!(path = %path.display(), records = records.len(), "Opened file store");

        Ok(Self {
            inner: MemoryStore::from_records(records),
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current records with `key` left out
    fn staged_without(&self, key: &InstanceKey) -> Vec<Instance> {
        let mut staged = self.inner.snapshot();
        staged.retain(|r| r.service_name != key.service_name || r.id != key.id);
        staged
    }

    async fn persist(&self, mut instances: Vec<Instance>) -> Result<()> {
        instances.sort_by(|a, b| (&a.service_name, &a.id).cmp(&(&b.service_name, &b.id)));

        let bytes = serde_json::to_vec_pretty(&Snapshot {
            version: SNAPSHOT_VERSION,
            instances,
        })
        .map_err(|e| Error::Store(format!("encode snapshot: {}", e)))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| store_io(&tmp, "write", e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| store_io(&self.path, "rename", e))?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "Snapshot written");
        Ok(())
    }
}

#[async_trait]
impl InstanceStore for FileStore {
    async fn upsert(&self, mut instance: Instance, now: DateTime<Utc>) -> Result<Instance> {
        let _guard = self.write_lock.lock().await;
        instance.touch(now);
        let key = instance.key();

        let mut staged = self.staged_without(&key);
        staged.push(instance.clone());
        if let Err(e) = self.persist(staged).await {
            warn!(key = %key, error = %e, "Upsert not applied, snapshot write failed");
            return Err(e);
        }

        self.inner.put_raw(instance.clone());
        Ok(instance)
    }

    async fn touch_heartbeat(&self, key: &InstanceKey, now: DateTime<Utc>) -> Result<Instance> {
        let _guard = self.write_lock.lock().await;
        let mut touched = self
            .inner
            .get(key)
            .ok_or_else(|| Error::not_found(key.service_name.clone(), key.id.clone()))?;
        touched.touch(now);

        let mut staged = self.staged_without(key);
        staged.push(touched.clone());
        if let Err(e) = self.persist(staged).await {
            warn!(key = %key, error = %e, "Heartbeat not applied, snapshot write failed");
            return Err(e);
        }

        self.inner.put_raw(touched.clone());
        Ok(touched)
    }

    async fn query(&self, predicate: &Predicate) -> Result<Vec<Instance>> {
        Ok(self.inner.query_sync(predicate))
    }

    async fn delete_where(&self, predicate: &Predicate) -> Result<Vec<Instance>> {
        let _guard = self.write_lock.lock().await;
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .inner
            .snapshot()
            .into_iter()
            .partition(|r| predicate.matches(r));
        if removed.is_empty() {
            return Ok(removed);
        }

        if let Err(e) = self.persist(kept).await {
            warn!(matched = removed.len(), error = %e, "Delete not applied, snapshot write failed");
            return Err(e);
        }

        for record in &removed {
            self.inner.remove_sync(&record.key());
        }
        Ok(removed)
    }

    async fn remove(&self, key: &InstanceKey) -> Result<Option<Instance>> {
        let _guard = self.write_lock.lock().await;
        if self.inner.get(key).is_none() {
            return Ok(None);
        }

        if let Err(e) = self.persist(self.staged_without(key)).await {
            warn!(key = %key, error = %e, "Remove not applied, snapshot write failed");
            return Err(e);
        }
        Ok(self.inner.remove_sync(key))
    }

    fn len(&self) -> usize {
        self.inner.record_count()
    }
}
