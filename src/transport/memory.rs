//! Deterministic in-memory transport.
//!
//! Implements the full [`KvTransport`] capability against a process-local
//! map, with per-key monotonically increasing versions and broadcast-based
//! watch streams. Used as the substitutable test double and for local
//! development. Fault-injection switches simulate an unreachable backend and
//! a silently stalled watch stream, the two failure modes the store is built
//! to survive.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::KvTransport;
use super::VersionedValue;
use super::WatchEvent;
use super::WatchEventKind;
use super::WatchStream;
use crate::Error;
use crate::Result;

const WATCH_TOPIC_CAPACITY: usize = 64;

#[derive(Default)]
struct State {
    entries: HashMap<String, VersionedValue>,
    // Next-version counters survive deletes so a recreate never reuses a
    // version a client may already have observed.
    versions: HashMap<String, i64>,
    topics: HashMap<String, broadcast::Sender<WatchEvent>>,
}

/// In-memory coordination-service stand-in.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<State>>,
    fail_transient: Arc<AtomicBool>,
    fail_unauthorized: Arc<AtomicBool>,
    mute_watch: Arc<AtomicBool>,
    get_calls: Arc<AtomicUsize>,
    put_calls: Arc<AtomicUsize>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// When enabled, every call fails with a transient error, as if the
    /// backend were unreachable.
    pub fn set_fail_transient(&self, fail: bool) {
        self.fail_transient.store(fail, Ordering::SeqCst);
    }

    /// When enabled, every call is rejected as unauthorized, which is a
    /// terminal outcome rather than a retryable one.
    pub fn set_fail_unauthorized(&self, fail: bool) {
        self.fail_unauthorized.store(fail, Ordering::SeqCst);
    }

    /// When enabled, writes are applied but no watch events are delivered,
    /// simulating a silently stalled stream.
    pub fn set_mute_watch(&self, mute: bool) {
        self.mute_watch.store(mute, Ordering::SeqCst);
    }

    /// Number of `get` calls observed, including failed ones.
    pub fn get_call_count(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of `put`/`put_if_version` calls observed, including failed ones.
    pub fn put_call_count(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.fail_unauthorized.load(Ordering::SeqCst) {
            return Err(Error::Unauthorized("injected credential rejection".into()));
        }
        if self.fail_transient.load(Ordering::SeqCst) {
            return Err(Error::transient("injected transport failure"));
        }
        Ok(())
    }

    fn publish(state: &mut State, mute: bool, event: WatchEvent) {
        if mute {
            return;
        }
        if let Some(topic) = state.topics.get(&event.key) {
            // No receivers is fine; the topic stays for future watchers.
            let _ = topic.send(event);
        }
    }

    fn apply_put(&self, key: &str, value: Bytes) -> i64 {
        let mut state = self.state.lock();
        let next = state.versions.entry(key.to_string()).or_insert(0);
        *next += 1;
        let version = *next;
        state.entries.insert(
            key.to_string(),
            VersionedValue {
                value: value.clone(),
                version,
            },
        );
        Self::publish(
            &mut state,
            self.mute_watch.load(Ordering::SeqCst),
            WatchEvent {
                key: key.to_string(),
                kind: WatchEventKind::Put,
                value,
                version,
            },
        );
        version
    }
}

#[async_trait]
impl KvTransport for MemoryTransport {
    async fn get(&self, key: &str) -> Result<Option<VersionedValue>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.state.lock().entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<i64> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.apply_put(key, value))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        let mut state = self.state.lock();
        if state.entries.remove(key).is_none() {
            return Ok(false);
        }
        let next = state.versions.entry(key.to_string()).or_insert(0);
        *next += 1;
        let version = *next;
        Self::publish(
            &mut state,
            self.mute_watch.load(Ordering::SeqCst),
            WatchEvent {
                key: key.to_string(),
                kind: WatchEventKind::Delete,
                value: Bytes::new(),
                version,
            },
        );
        Ok(true)
    }

    async fn put_if_version(&self, key: &str, value: Bytes, expected: i64) -> Result<i64> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let actual = {
            let state = self.state.lock();
            state.entries.get(key).map(|v| v.version).unwrap_or(0)
        };
        if actual != expected {
            return Err(Error::VersionMismatch {
                key: key.to_string(),
                expected,
                actual,
            });
        }
        Ok(self.apply_put(key, value))
    }

    async fn watch(&self, key: &str) -> Result<WatchStream> {
        self.check_available()?;
        let receiver = {
            let mut state = self.state.lock();
            state
                .topics
                .entry(key.to_string())
                .or_insert_with(|| broadcast::channel(WATCH_TOPIC_CAPACITY).0)
                .subscribe()
        };
        // Lagged receivers skip to the newest events, which is all the
        // supervisor needs; it reconciles via get after any gap.
        let stream = BroadcastStream::new(receiver).filter_map(|item| async move { item.ok().map(Ok) });
        Ok(Box::pin(stream))
    }
}
