//! # coordkv
//!
//! A watch-driven caching client for a strongly-consistent key/value
//! coordination service.
//!
//! The [`Store`] is the single entry point. It front-loads a pluggable
//! [`KvTransport`] with a local [`Entry`] cache kept fresh by server-side
//! watch streams, so steady-state reads of watched keys never leave the
//! process. Remote calls run under a bounded, jittered retry budget, and an
//! optional disk snapshot lets a restarted process serve last-known values
//! while the service is unreachable.
//!
//! ## What this crate provides
//!
//! - **Read-through caching** - watched keys are served locally; unwatched
//!   keys fall back to the remote service
//! - **Watch supervision** - one upstream stream per key, shared across
//!   subscribers, with staleness detection and automatic reset
//! - **Bounded retries** - capped exponential backoff with jitter around
//!   every remote call
//! - **Warm starts** - optional atomic snapshot of the cache on disk
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use coordkv::MemoryTransport;
//! use coordkv::Options;
//! use coordkv::Store;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> coordkv::Result<()> {
//!     let transport = Arc::new(MemoryTransport::new());
//!     let store = Store::new(transport, Options::default())?;
//!
//!     store.set("service/leader", "node-1").await?;
//!
//!     let mut sub = store.watch("service/leader")?;
//!     if let Some(update) = sub.next().await {
//!         println!("leader changed: {update:?}");
//!     }
//!
//!     store.close().await;
//!     Ok(())
//! }
//! ```

mod cache;
mod errors;
mod metrics;
mod options;
mod retry;
mod store;
mod transport;
mod watch;

pub use errors::*;
pub use metrics::*;
pub use options::*;
pub use store::*;
pub use transport::memory::MemoryTransport;
pub use transport::*;
pub use watch::Subscription;
pub use watch::WatchUpdate;
