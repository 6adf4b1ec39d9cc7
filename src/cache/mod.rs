//! In-memory versioned cache with optional disk-backed durability.
//!
//! Reads never block on the network; freshness for watched keys is the
//! supervisor's job. The per-key version guard keeps versions observed by a
//! single process non-decreasing even when watch events, reconciling gets,
//! and write responses race each other.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::info;
use tracing::warn;

use crate::transport::VersionedValue;

mod snapshot;


#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Bytes,
    pub version: i64,
    pub updated_at: SystemTime,
    /// False for entries restored from a snapshot that have not yet been
    /// confirmed by a remote read or watch event.
    pub synced: bool,
}

impl CacheEntry {
    pub fn versioned_value(&self) -> VersionedValue {
        VersionedValue {
            value: self.value.clone(),
            version: self.version,
        }
    }
}

pub(crate) struct Cache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    snapshot_path: Option<PathBuf>,
    // Single writer at a time for the snapshot file.
    snapshot_lock: Mutex<()>,
}

impl Cache {
    /// Create the cache, warm-loading the snapshot when a path is
    /// configured. A corrupt snapshot is logged and discarded; the cache
    /// cold-starts in that case.
    pub(crate) fn open(snapshot_path: Option<PathBuf>) -> Self {
        let mut entries = HashMap::new();

        if let Some(path) = &snapshot_path {
            match snapshot::load(path) {
                Ok(Some(snap)) => {
                    let now = SystemTime::now();
                    for entry in snap.entries {
                        entries.insert(
                            entry.key,
                            CacheEntry {
                                value: Bytes::from(entry.value),
                                version: entry.version,
                                updated_at: now,
                                synced: false,
                            },
                        );
                    }
                    info!(path = %path.display(), keys = entries.len(), "cache warm-started from snapshot");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "discarding unreadable cache snapshot");
                    let _ = std::fs::remove_file(path);
                }
            }
        }

        Self {
            entries: RwLock::new(entries),
            snapshot_path,
            snapshot_lock: Mutex::new(()),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    /// Apply an update observed from the remote service. Updates carrying a
    /// version below the cached one are ignored so per-key versions stay
    /// non-decreasing. Returns whether the entry changed.
    pub(crate) fn update(&self, key: &str, value: Bytes, version: i64) -> bool {
        {
            let mut entries = self.entries.write();
            match entries.get_mut(key) {
                Some(existing) if existing.version > version => return false,
                Some(existing) if existing.version == version && existing.synced => return false,
                _ => {}
            }
            entries.insert(
                key.to_string(),
                CacheEntry {
                    value,
                    version,
                    updated_at: SystemTime::now(),
                    synced: true,
                },
            );
        }
        self.persist();
        true
    }

    /// Drop a key, e.g. after a remote delete or a not-found read.
    pub(crate) fn remove(&self, key: &str) {
        let removed = self.entries.write().remove(key).is_some();
        if removed {
            self.persist();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Serialize the current map to the configured snapshot path. Failures
    /// are logged, never surfaced: disk durability is best-effort and must
    /// not block or fail the in-memory update path.
    pub(crate) fn persist(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };

        // The map must be read under the writer lock: capturing it before
        // would let two racing persists write their snapshots in the
        // opposite order and leave the older state on disk.
        let _writer = self.snapshot_lock.lock();
        let entries: Vec<snapshot::SnapshotEntry> = self
            .entries
            .read()
            .iter()
            .map(|(key, entry)| snapshot::SnapshotEntry {
                key: key.clone(),
                value: entry.value.to_vec(),
                version: entry.version,
            })
            .collect();

        if let Err(e) = snapshot::store(path, &snapshot::Snapshot::new(entries)) {
            warn!(path = %path.display(), error = %e, "cache snapshot write failed");
        }
    }
}
