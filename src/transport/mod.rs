//! Abstract RPC capability against the coordination service.
//!
//! The store is a client only: everything it needs from the backing cluster
//! is expressed by [`KvTransport`], so a gRPC transport, an embedded server
//! handle, or the in-memory double in [`memory`] are all substitutable
//! without touching the core.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::Result;

pub mod memory;

#[cfg(test)]
mod memory_test;

/// An opaque payload plus the per-key revision the service assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub value: Bytes,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// Key was inserted or updated.
    Put,
    /// Key was deleted.
    Delete,
}

/// A revisioned change event delivered on a watch stream.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub key: String,
    pub kind: WatchEventKind,
    /// Empty for delete events.
    pub value: Bytes,
    pub version: i64,
}

pub type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchEvent>> + Send>>;

/// Client capability of an etcd-like coordination service.
///
/// Versions are assigned by the service, monotonically increasing per key.
/// Implementations map their native failure modes onto the crate error
/// taxonomy; only [`Error::Timeout`](crate::Error::Timeout) and
/// [`Error::Transient`](crate::Error::Transient) are treated as retryable by
/// the store.
#[async_trait]
pub trait KvTransport: Send + Sync + 'static {
    /// Current value and version for `key`, or `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<VersionedValue>>;

    /// Unconditional write; returns the new version.
    async fn put(&self, key: &str, value: Bytes) -> Result<i64>;

    /// Delete `key`; returns false when the key was already absent.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Conditional single-key write (Txn): succeeds only when the stored
    /// version equals `expected`, where `expected == 0` requires the key to
    /// be absent. Returns the new version, or
    /// [`Error::VersionMismatch`](crate::Error::VersionMismatch).
    async fn put_if_version(&self, key: &str, value: Bytes, expected: i64) -> Result<i64>;

    /// Open a long-lived stream of change events for `key`.
    async fn watch(&self, key: &str) -> Result<WatchStream>;
}
