//! Instrumentation seam for the store.
//!
//! The store never talks to a metrics backend directly; it records through
//! the injected [`InstrumentSink`] so the embedding process decides where the
//! numbers go. [`PrometheusInstrument`] is the batteries-included
//! implementation; [`NoopInstrument`] is the default for tests and for stores
//! that run without a metrics pipeline.

use std::time::Duration;

use prometheus::exponential_buckets;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;

use crate::Error;
use crate::Result;

#[cfg(test)]
mod metrics_test;

/// Receiver for store-level instrumentation events.
///
/// Implementations must be cheap and non-blocking: every remote call and
/// every cache lookup reports through this trait.
pub trait InstrumentSink: Send + Sync + 'static {
    /// A remote call was issued, counting all attempts as one request.
    fn incr_request_count(&self, op: &'static str);

    /// End-to-end latency of a remote call, including retries.
    fn observe_request_latency(&self, op: &'static str, latency: Duration);

    /// A retry attempt consumed budget.
    fn incr_retry_count(&self, op: &'static str);

    /// A watch stream was reset after a staleness or stream failure.
    fn incr_watch_reset_count(&self);

    /// A read was served from the local cache.
    fn incr_cache_hit_count(&self);

    /// A read had to consult the remote service.
    fn incr_cache_miss_count(&self);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInstrument;

impl InstrumentSink for NoopInstrument {
    fn incr_request_count(&self, _op: &'static str) {}

    fn observe_request_latency(&self, _op: &'static str, _latency: Duration) {}

    fn incr_retry_count(&self, _op: &'static str) {}

    fn incr_watch_reset_count(&self) {}

    fn incr_cache_hit_count(&self) {}

    fn incr_cache_miss_count(&self) {}
}

/// Prometheus-backed sink registering its collectors against a
/// caller-supplied [`Registry`].
pub struct PrometheusInstrument {
    request_count: IntCounterVec,
    request_latency: HistogramVec,
    retry_count: IntCounterVec,
    watch_reset_count: IntCounter,
    cache_hit_count: IntCounter,
    cache_miss_count: IntCounter,
}

impl PrometheusInstrument {
    pub fn register(registry: &Registry) -> Result<Self> {
        let request_count = IntCounterVec::new(
            Opts::new("coordkv_request_count", "Remote requests issued, by operation"),
            &["op"],
        )
        .map_err(|e| Error::Configuration(e.to_string()))?;

        let request_latency = HistogramVec::new(
            HistogramOpts::new(
                "coordkv_request_latency_ms",
                "End-to-end remote request latency in ms, by operation",
            )
            .buckets(exponential_buckets(1.0, 2.0, 12).map_err(|e| Error::Configuration(e.to_string()))?),
            &["op"],
        )
        .map_err(|e| Error::Configuration(e.to_string()))?;

        let retry_count = IntCounterVec::new(
            Opts::new("coordkv_retry_count", "Retry attempts consumed, by operation"),
            &["op"],
        )
        .map_err(|e| Error::Configuration(e.to_string()))?;

        let watch_reset_count = IntCounter::new("coordkv_watch_reset_count", "Watch stream resets")
            .map_err(|e| Error::Configuration(e.to_string()))?;

        let cache_hit_count = IntCounter::new("coordkv_cache_hit_count", "Reads served from the local cache")
            .map_err(|e| Error::Configuration(e.to_string()))?;

        let cache_miss_count = IntCounter::new("coordkv_cache_miss_count", "Reads that consulted the remote service")
            .map_err(|e| Error::Configuration(e.to_string()))?;

        for collector in [
            Box::new(request_count.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(request_latency.clone()),
            Box::new(retry_count.clone()),
            Box::new(watch_reset_count.clone()),
            Box::new(cache_hit_count.clone()),
            Box::new(cache_miss_count.clone()),
        ] {
            registry
                .register(collector)
                .map_err(|e| Error::Configuration(e.to_string()))?;
        }

        Ok(Self {
            request_count,
            request_latency,
            retry_count,
            watch_reset_count,
            cache_hit_count,
            cache_miss_count,
        })
    }
}

impl InstrumentSink for PrometheusInstrument {
    fn incr_request_count(&self, op: &'static str) {
        self.request_count.with_label_values(&[op]).inc();
    }

    fn observe_request_latency(&self, op: &'static str, latency: Duration) {
        self.request_latency
            .with_label_values(&[op])
            .observe(latency.as_secs_f64() * 1000.0);
    }

    fn incr_retry_count(&self, op: &'static str) {
        self.retry_count.with_label_values(&[op]).inc();
    }

    fn incr_watch_reset_count(&self) {
        self.watch_reset_count.inc();
    }

    fn incr_cache_hit_count(&self) {
        self.cache_hit_count.inc();
    }

    fn incr_cache_miss_count(&self) {
        self.cache_miss_count.inc();
    }
}
