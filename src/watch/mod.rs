//! Watch-channel supervision.
//!
//! One logical remote watch stream per key, shared by every subscriber of
//! that key, so load on the coordination service is bounded by the number of
//! distinct watched keys rather than the number of local subscribers.
//!
//! A remote stream can stop delivering events without ever signaling an
//! error (network partitions, server-side history compaction), so liveness
//! is inferred: every `watch_chan_check_interval` the loop checks how long
//! the stream has been silent, and past `watch_chan_reset_interval` it drops
//! the stream, opens a replacement, and issues one reconciling get to resync
//! the cache to the authoritative state. Continuity across the gap is not
//! assumed; only the reconciled state is guaranteed correct.
//!
//! Fanout uses `tokio::sync::watch` channels: subscribers always observe the
//! latest value, intermediate versions are coalesced under backpressure
//! (drop-oldest, deliver-latest).

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::cache::Cache;
use crate::metrics::InstrumentSink;
use crate::retry::RetryExecutor;
use crate::transport::KvTransport;
use crate::transport::VersionedValue;
use crate::transport::WatchEvent;
use crate::transport::WatchEventKind;


/// A value update delivered to watch subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchUpdate {
    Put(VersionedValue),
    Deleted { version: i64 },
}

impl WatchUpdate {
    pub fn version(&self) -> i64 {
        match self {
            WatchUpdate::Put(v) => v.version,
            WatchUpdate::Deleted { version } => *version,
        }
    }

    pub fn value(&self) -> Option<&VersionedValue> {
        match self {
            WatchUpdate::Put(v) => Some(v),
            WatchUpdate::Deleted { .. } => None,
        }
    }
}

/// Handle to a shared watch on one key.
///
/// Dropping the subscription releases it; when the last subscription for a
/// key is gone the supervisor closes the underlying remote stream at its
/// next liveness check.
#[derive(Debug)]
pub struct Subscription {
    key: String,
    rx: watch::Receiver<Option<WatchUpdate>>,
}

impl Subscription {
    /// The (transformed) key this subscription observes.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the next update. Intermediate versions may be coalesced;
    /// the value seen is always the latest. Returns `None` once the store
    /// is closed.
    pub async fn next(&mut self) -> Option<WatchUpdate> {
        loop {
            self.rx.changed().await.ok()?;
            let update = self.rx.borrow_and_update().clone();
            if let Some(update) = update {
                return Some(update);
            }
        }
    }

    /// Latest update observed on this key, without waiting.
    pub fn current(&self) -> Option<WatchUpdate> {
        self.rx.borrow().clone()
    }
}

struct WatchHandle {
    id: u64,
    tx: watch::Sender<Option<WatchUpdate>>,
}

pub(crate) struct WatchSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    transport: Arc<dyn KvTransport>,
    cache: Arc<Cache>,
    retry: RetryExecutor,
    instrument: Arc<dyn InstrumentSink>,
    check_interval: Duration,
    reset_interval: Duration,
    reopen_backoff: Duration,
    watches: DashMap<String, WatchHandle>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WatchSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        transport: Arc<dyn KvTransport>,
        cache: Arc<Cache>,
        retry: RetryExecutor,
        instrument: Arc<dyn InstrumentSink>,
        check_interval: Duration,
        reset_interval: Duration,
        reopen_backoff: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                transport,
                cache,
                retry,
                instrument,
                check_interval,
                reset_interval,
                reopen_backoff,
                watches: DashMap::new(),
                next_id: AtomicU64::new(1),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a subscriber for `key`, starting the shared watch loop when
    /// this is the first subscription.
    pub(crate) fn subscribe(&self, key: &str) -> Subscription {
        // The entry guard serializes against the loop's zero-subscriber
        // reclamation, so a subscription never lands on a dying handle.
        let entry = self.inner.watches.entry(key.to_string());
        let mut rx = match entry {
            dashmap::mapref::entry::Entry::Occupied(occupied) => occupied.get().tx.subscribe(),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let seed = self
                    .inner
                    .cache
                    .get(key)
                    .filter(|e| e.synced)
                    .map(|e| WatchUpdate::Put(e.versioned_value()));
                let (tx, rx) = watch::channel(seed);
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                vacant.insert(WatchHandle { id, tx: tx.clone() });

                let task = tokio::spawn(run_watch_loop(
                    self.inner.clone(),
                    key.to_string(),
                    id,
                    tx,
                ));
                self.inner.tasks.lock().push(task);
                rx
            }
        };

        // A subscriber with a known current value gets it as its first
        // notification instead of waiting for the next change.
        if rx.borrow().is_some() {
            rx.mark_changed();
        }

        Subscription {
            key: key.to_string(),
            rx,
        }
    }

    /// Whether `key` currently has an active shared watch with at least one
    /// live subscriber. The cache is authoritative for such keys.
    pub(crate) fn is_watched(&self, key: &str) -> bool {
        self.inner
            .watches
            .get(key)
            .map(|handle| handle.tx.receiver_count() > 0)
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn watched_key_count(&self) -> usize {
        self.inner.watches.len()
    }

    /// Cancel every watch loop and wait for teardown up to `grace`; loops
    /// still stuck in a network call after that are abandoned.
    pub(crate) async fn close(&self, grace: Duration) {
        self.inner.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
        if !tasks.is_empty() && timeout(grace, join_all(tasks)).await.is_err() {
            warn!("watch loops did not stop within the grace period, abandoning");
        }
        self.inner.watches.clear();
    }
}

/// Per-key supervision loop: Starting -> Active -> Stale/Resetting -> Closed.
async fn run_watch_loop(
    inner: Arc<SupervisorInner>,
    key: String,
    id: u64,
    tx: watch::Sender<Option<WatchUpdate>>,
) {
    let mut check = interval(inner.check_interval);
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'supervise: loop {
        if inner.cancel.is_cancelled() {
            break;
        }

        // Starting: open the stream first so no event gap opens between the
        // stream and the reconciling get.
        let mut stream = match inner.transport.watch(&key).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to open watch stream, backing off");
                tokio::select! {
                    _ = inner.cancel.cancelled() => break 'supervise,
                    _ = sleep(inner.reopen_backoff) => continue 'supervise,
                }
            }
        };

        reconcile(&inner, &key, &tx).await;
        let mut last_event = Instant::now();

        // Active.
        loop {
            tokio::select! {
                _ = inner.cancel.cancelled() => break 'supervise,

                event = stream.next() => match event {
                    Some(Ok(event)) => {
                        last_event = Instant::now();
                        apply_event(&inner, &key, &tx, event);
                    }
                    Some(Err(e)) => {
                        warn!(key = %key, error = %e, "watch stream error, resetting");
                        inner.instrument.incr_watch_reset_count();
                        continue 'supervise;
                    }
                    None => {
                        warn!(key = %key, "watch stream ended, resetting");
                        inner.instrument.incr_watch_reset_count();
                        continue 'supervise;
                    }
                },

                _ = check.tick() => {
                    let reclaimed = inner
                        .watches
                        .remove_if(&key, |_, handle| handle.id == id && handle.tx.receiver_count() == 0)
                        .is_some();
                    if reclaimed {
                        debug!(key = %key, "no subscribers left, closing watch");
                        break 'supervise;
                    }

                    if last_event.elapsed() > inner.reset_interval {
                        warn!(
                            key = %key,
                            silent_for = ?last_event.elapsed(),
                            "watch stream stale, resetting"
                        );
                        inner.instrument.incr_watch_reset_count();
                        continue 'supervise;
                    }
                }
            }
        }
    }

    // Closed: drop the registry entry (unless a newer loop owns the key) and
    // the sender, which ends every Subscription::next() with None.
    inner
        .watches
        .remove_if(&key, |_, handle| handle.id == id);
}

/// Resynchronize the cache and subscribers to the current authoritative
/// value. Runs once per (re)start of a stream.
async fn reconcile(
    inner: &Arc<SupervisorInner>,
    key: &str,
    tx: &watch::Sender<Option<WatchUpdate>>,
) {
    let transport = inner.transport.clone();
    let lookup = {
        let key = key.to_string();
        move || {
            let transport = transport.clone();
            let key = key.clone();
            async move { transport.get(&key).await }
        }
    };

    match inner.retry.execute("watch_reconcile", lookup).await {
        Ok(Some(value)) => {
            inner.cache.update(key, value.value.clone(), value.version);
            publish(tx, WatchUpdate::Put(value));
        }
        Ok(None) => {
            // Key is gone. Version the deletion at the last delivered
            // version so it is published at most once per actual removal.
            let deleted_at = tx.borrow().as_ref().map(|u| u.version());
            inner.cache.remove(key);
            if let Some(version) = deleted_at {
                publish(tx, WatchUpdate::Deleted { version });
            }
        }
        Err(e) => {
            // Keep serving the last-known value; the stream is already
            // (re)opened and the next reset will reconcile again.
            warn!(key = %key, error = %e, "watch reconciliation failed");
        }
    }
}

fn apply_event(
    inner: &Arc<SupervisorInner>,
    key: &str,
    tx: &watch::Sender<Option<WatchUpdate>>,
    event: WatchEvent,
) {
    match event.kind {
        WatchEventKind::Put => {
            inner.cache.update(key, event.value.clone(), event.version);
            publish(
                tx,
                WatchUpdate::Put(VersionedValue {
                    value: event.value,
                    version: event.version,
                }),
            );
        }
        WatchEventKind::Delete => {
            inner.cache.remove(key);
            publish(
                tx,
                WatchUpdate::Deleted {
                    version: event.version,
                },
            );
        }
    }
}

/// Publish an update unless it would move a subscriber backwards: a `Put`
/// must carry a strictly newer version; a `Deleted` may share the version of
/// the `Put` it supersedes but is never repeated.
fn publish(tx: &watch::Sender<Option<WatchUpdate>>, update: WatchUpdate) {
    tx.send_if_modified(|current| {
        let accept = match (current.as_ref(), &update) {
            (None, _) => true,
            (Some(prev), WatchUpdate::Put(next)) => next.version > prev.version(),
            (Some(WatchUpdate::Deleted { version: prev }), WatchUpdate::Deleted { version }) => {
                version > prev
            }
            (Some(prev), WatchUpdate::Deleted { version }) => *version >= prev.version(),
        };
        if accept {
            *current = Some(update.clone());
        }
        accept
    });
}
