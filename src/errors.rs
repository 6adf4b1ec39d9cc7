//! Error taxonomy for the caching KV client.
//!
//! Errors are split along the retry boundary: [`Error::is_retryable`] is true
//! exactly for the transient classes (deadline exceeded, unavailable). The
//! optimistic-concurrency conflict and not-found outcomes are surfaced as
//! their own variants so callers can branch on them without string matching.

use std::time::Duration;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid options, surfaced at store construction.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Per-call deadline exceeded. Retryable.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Network-level or availability failure. Retryable.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Optimistic-concurrency conflict. Never retried automatically;
    /// callers must re-read and retry with a fresh version.
    #[error("version mismatch on key {key}: expected {expected}, found {actual}")]
    VersionMismatch {
        key: String,
        expected: i64,
        actual: i64,
    },

    /// The key is absent. A valid outcome for reads and deletes.
    #[error("key not found: {0}")]
    NotFound(String),

    /// Authorization failure. Propagates immediately, never retried.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Retry budget exhausted; wraps the last underlying error.
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<Error>,
    },

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Unrecoverable local failure, e.g. a corrupt cache snapshot.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether the error class may be resolved by retrying the call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Transient(_))
    }

    pub(crate) fn transient(msg: impl Into<String>) -> Self {
        Error::Transient(msg.into())
    }

    pub(crate) fn fatal(msg: impl Into<String>) -> Self {
        Error::Fatal(msg.into())
    }
}
