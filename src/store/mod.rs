//! Public store façade.
//!
//! Composes the cache, retry executor and watch supervisor over an injected
//! [`KvTransport`]. Reads prefer the cache for watched keys; writes always go
//! remote and update the cache only on success, so the cache never leaves the
//! set of states the service has confirmed.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;
use tracing::warn;

use crate::cache::Cache;
use crate::metrics::InstrumentSink;
use crate::options::KeyFn;
use crate::options::Options;
use crate::retry::RetryExecutor;
use crate::transport::KvTransport;
use crate::watch::Subscription;
use crate::watch::WatchSupervisor;
use crate::Error;
use crate::Result;


/// A value read through the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Bytes,
    pub version: i64,
    /// True when the value was served from local state without remote
    /// confirmation (snapshot warm-start, or cache fallback during an
    /// outage). Callers decide whether stale data is acceptable.
    pub stale: bool,
}

/// Client for shared cluster state held in a coordination service.
///
/// Cheap to clone; all clones share the same cache and watch streams.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    transport: Arc<dyn KvTransport>,
    key_fn: KeyFn,
    instrument: Arc<dyn InstrumentSink>,
    cache: Arc<Cache>,
    retry: RetryExecutor,
    supervisor: WatchSupervisor,
    close_grace: Duration,
    closed: AtomicBool,
}

impl Store {
    /// Construct a store over `transport`. Validates `options` and, when a
    /// cache file path is configured, warm-loads the snapshot before any
    /// remote call is attempted.
    pub fn new(transport: Arc<dyn KvTransport>, options: Options) -> Result<Self> {
        options.validate()?;

        // Validated above.
        let key_fn = options.key_fn.clone().expect("validated");
        let instrument = options.instrument.clone().expect("validated");
        let retry_opts = options.retry.expect("validated");

        let cache = Arc::new(Cache::open(options.cache_file_path.clone()));
        let retry = RetryExecutor::new(retry_opts, options.request_timeout, instrument.clone());
        let supervisor = WatchSupervisor::new(
            transport.clone(),
            cache.clone(),
            retry.clone(),
            instrument.clone(),
            options.watch_chan_check_interval,
            options.watch_chan_reset_interval,
            retry_opts.base_delay,
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                transport,
                key_fn,
                instrument,
                cache,
                retry,
                supervisor,
                close_grace: options.request_timeout * 2,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Read `key`.
    ///
    /// For keys under an active watch the cache is authoritative and the
    /// read never touches the network. Otherwise the remote service is
    /// consulted so reads never silently return unboundedly stale data; if
    /// the service is unreachable but a cached value exists it is served
    /// with [`Entry::stale`] set.
    pub async fn get(&self, key: &str) -> Result<Entry> {
        self.check_open()?;
        let key = (self.inner.key_fn)(key);

        if self.inner.supervisor.is_watched(&key) {
            if let Some(entry) = self.inner.cache.get(&key) {
                if entry.synced {
                    self.inner.instrument.incr_cache_hit_count();
                    return Ok(Entry {
                        value: entry.value,
                        version: entry.version,
                        stale: false,
                    });
                }
            }
        }

        self.inner.instrument.incr_cache_miss_count();
        let transport = self.inner.transport.clone();
        let lookup = {
            let key = key.clone();
            move || {
                let transport = transport.clone();
                let key = key.clone();
                async move { transport.get(&key).await }
            }
        };

        match self.inner.retry.execute("get", lookup).await {
            Ok(Some(value)) => {
                self.inner.cache.update(&key, value.value.clone(), value.version);
                Ok(Entry {
                    value: value.value,
                    version: value.version,
                    stale: false,
                })
            }
            Ok(None) => {
                // The service is the source of truth: an absent key
                // invalidates whatever the cache still holds.
                self.inner.cache.remove(&key);
                Err(Error::NotFound(key))
            }
            Err(e) => match self.inner.cache.get(&key) {
                Some(entry) => {
                    warn!(key = %key, error = %e, "remote get failed, serving last-known value as stale");
                    Ok(Entry {
                        value: entry.value,
                        version: entry.version,
                        stale: true,
                    })
                }
                None => Err(e),
            },
        }
    }

    /// Write `value` to `key`; returns the new version. The cache is only
    /// updated on success, so a failed write preserves last-known-good.
    pub async fn set(&self, key: &str, value: impl Into<Bytes>) -> Result<i64> {
        self.check_open()?;
        let key = (self.inner.key_fn)(key);
        let value = value.into();

        let transport = self.inner.transport.clone();
        let write = {
            let key = key.clone();
            let value = value.clone();
            move || {
                let transport = transport.clone();
                let key = key.clone();
                let value = value.clone();
                async move { transport.put(&key, value).await }
            }
        };

        let version = self.inner.retry.execute("set", write).await?;
        debug!(key = %key, version, "set");
        self.inner.cache.update(&key, value, version);
        Ok(version)
    }

    /// Conditional write: succeeds only while the stored version equals
    /// `expected_version` (`0` means the key must not exist). A version
    /// conflict surfaces as [`Error::VersionMismatch`] and is never retried
    /// automatically — retrying would defeat the optimistic-concurrency
    /// intent; callers must re-[`get`](Store::get) and retry explicitly.
    pub async fn compare_and_set(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        expected_version: i64,
    ) -> Result<i64> {
        self.check_open()?;
        let key = (self.inner.key_fn)(key);
        let value = value.into();

        let transport = self.inner.transport.clone();
        let write = {
            let key = key.clone();
            let value = value.clone();
            move || {
                let transport = transport.clone();
                let key = key.clone();
                let value = value.clone();
                async move { transport.put_if_version(&key, value, expected_version).await }
            }
        };

        let version = self.inner.retry.execute("compare_and_set", write).await?;
        debug!(key = %key, version, expected_version, "compare_and_set");
        self.inner.cache.update(&key, value, version);
        Ok(version)
    }

    /// Delete `key`. Returns false when the key was already absent, which is
    /// a valid outcome rather than an error.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.check_open()?;
        let key = (self.inner.key_fn)(key);

        let transport = self.inner.transport.clone();
        let remove = {
            let key = key.clone();
            move || {
                let transport = transport.clone();
                let key = key.clone();
                async move { transport.delete(&key).await }
            }
        };

        let deleted = self.inner.retry.execute("delete", remove).await?;
        self.inner.cache.remove(&key);
        Ok(deleted)
    }

    /// Subscribe to updates for `key`. All subscriptions to the same key
    /// share one remote watch stream; the subscription is released when the
    /// returned handle is dropped.
    pub fn watch(&self, key: &str) -> Result<Subscription> {
        self.check_open()?;
        let key = (self.inner.key_fn)(key);
        Ok(self.inner.supervisor.subscribe(&key))
    }

    /// Shut the store down: cancels every watch loop, waits for teardown up
    /// to a bounded grace period, and flushes the cache snapshot. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.supervisor.close(self.inner.close_grace).await;
        self.inner.cache.persist();
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}
