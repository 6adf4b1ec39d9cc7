//! Store configuration.
//!
//! [`Options`] is an immutable value: every `with_*` constructor consumes the
//! receiver and returns a new value, so a cloned base configuration can be
//! reused to derive many store configurations concurrently without shared
//! mutable state.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::InstrumentSink;
use crate::metrics::NoopInstrument;
use crate::Error;
use crate::Result;

#[cfg(test)]
mod options_test;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_WATCH_CHAN_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_WATCH_CHAN_RESET_INTERVAL: Duration = Duration::from_secs(10);

/// Stateless key transform applied before any key reaches the backing
/// service or the cache, typically for namespacing.
pub type KeyFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Backoff and budget parameters for retrying remote calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,

    /// Initial backoff delay, doubled after each failed attempt.
    pub base_delay: Duration,

    /// Upper bound on the backoff delay.
    pub max_delay: Duration,

    /// Apply uniform jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

/// Immutable option set for constructing a [`Store`](crate::Store).
#[derive(Clone)]
pub struct Options {
    pub(crate) request_timeout: Duration,
    pub(crate) key_fn: Option<KeyFn>,
    pub(crate) instrument: Option<Arc<dyn InstrumentSink>>,
    pub(crate) retry: Option<RetryOptions>,
    pub(crate) watch_chan_check_interval: Duration,
    pub(crate) watch_chan_reset_interval: Duration,
    pub(crate) cache_file_path: Option<PathBuf>,
}

impl Default for Options {
    /// Sane defaults: 10s request timeout, identity key transform, no-op
    /// instrumentation, default retry policy, 10s watch liveness intervals,
    /// memory-only cache.
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            key_fn: Some(Arc::new(|key: &str| key.to_string())),
            instrument: Some(Arc::new(NoopInstrument)),
            retry: Some(RetryOptions::default()),
            watch_chan_check_interval: DEFAULT_WATCH_CHAN_CHECK_INTERVAL,
            watch_chan_reset_interval: DEFAULT_WATCH_CHAN_RESET_INTERVAL,
            cache_file_path: None,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("request_timeout", &self.request_timeout)
            .field("key_fn", &self.key_fn.as_ref().map(|_| "<fn>"))
            .field("instrument", &self.instrument.as_ref().map(|_| "<sink>"))
            .field("retry", &self.retry)
            .field("watch_chan_check_interval", &self.watch_chan_check_interval)
            .field("watch_chan_reset_interval", &self.watch_chan_reset_interval)
            .field("cache_file_path", &self.cache_file_path)
            .finish()
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-call deadline for remote requests (default: 10s).
    pub fn with_request_timeout(self, timeout: Duration) -> Self {
        Self {
            request_timeout: timeout,
            ..self
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Key transform applied before keys reach the backing service
    /// (default: identity).
    pub fn with_key_fn(self, key_fn: KeyFn) -> Self {
        Self {
            key_fn: Some(key_fn),
            ..self
        }
    }

    pub fn key_fn(&self) -> Option<&KeyFn> {
        self.key_fn.as_ref()
    }

    /// Instrumentation sink (default: [`NoopInstrument`]).
    pub fn with_instrument(self, sink: Arc<dyn InstrumentSink>) -> Self {
        Self {
            instrument: Some(sink),
            ..self
        }
    }

    pub fn instrument(&self) -> Option<&Arc<dyn InstrumentSink>> {
        self.instrument.as_ref()
    }

    /// Retry policy for remote calls (default: 5 retries, 500ms base delay).
    pub fn with_retry(self, retry: RetryOptions) -> Self {
        Self {
            retry: Some(retry),
            ..self
        }
    }

    pub fn retry(&self) -> Option<RetryOptions> {
        self.retry
    }

    /// How often each watch loop checks stream liveness and subscriber
    /// counts (default: 10s, must be > 0).
    pub fn with_watch_chan_check_interval(self, interval: Duration) -> Self {
        Self {
            watch_chan_check_interval: interval,
            ..self
        }
    }

    pub fn watch_chan_check_interval(&self) -> Duration {
        self.watch_chan_check_interval
    }

    /// Maximum tolerated event silence before a watch stream is force-reset
    /// (default: 10s).
    pub fn with_watch_chan_reset_interval(self, interval: Duration) -> Self {
        Self {
            watch_chan_reset_interval: interval,
            ..self
        }
    }

    pub fn watch_chan_reset_interval(&self) -> Duration {
        self.watch_chan_reset_interval
    }

    /// File path for cache snapshot persistence. When unset the cache is
    /// memory-only.
    pub fn with_cache_file_path(self, path: impl AsRef<Path>) -> Self {
        Self {
            cache_file_path: Some(path.as_ref().to_path_buf()),
            ..self
        }
    }

    pub fn cache_file_path(&self) -> Option<&Path> {
        self.cache_file_path.as_deref()
    }

    /// Validate the option set. Called by [`Store::new`](crate::Store::new).
    pub fn validate(&self) -> Result<()> {
        if self.instrument.is_none() {
            return Err(Error::Configuration("no instrument options".into()));
        }

        if self.retry.is_none() {
            return Err(Error::Configuration("no retry options".into()));
        }

        if self.watch_chan_check_interval.is_zero() {
            return Err(Error::Configuration(
                "invalid watch channel check interval".into(),
            ));
        }

        if self.key_fn.is_none() {
            return Err(Error::Configuration("no key function set".into()));
        }

        Ok(())
    }
}
