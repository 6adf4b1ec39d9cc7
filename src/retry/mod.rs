//! Bounded retry with deadlines and backoff around a single remote call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio::time::Instant;
use tracing::warn;

use crate::metrics::InstrumentSink;
use crate::options::RetryOptions;
use crate::Error;
use crate::Result;

#[cfg(test)]
mod retry_test;

/// Wraps one remote call with up to `max_retries + 1` attempts, a per-attempt
/// deadline, and exponential backoff with jitter between attempts.
///
/// Only retryable error classes (timeout, transient) consume budget; every
/// other class fails fast so application-level errors are never masked by
/// retry delay.
#[derive(Clone)]
pub(crate) struct RetryExecutor {
    opts: RetryOptions,
    request_timeout: Duration,
    instrument: Arc<dyn InstrumentSink>,
}

impl RetryExecutor {
    pub(crate) fn new(
        opts: RetryOptions,
        request_timeout: Duration,
        instrument: Arc<dyn InstrumentSink>,
    ) -> Self {
        Self {
            opts,
            request_timeout,
            instrument,
        }
    }

    pub(crate) async fn execute<F, Fut, T>(&self, op: &'static str, task: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        self.instrument.incr_request_count(op);

        let result = self.run_attempts(op, task).await;

        self.instrument.observe_request_latency(op, started.elapsed());
        result
    }

    async fn run_attempts<F, Fut, T>(&self, op: &'static str, task: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.opts.max_retries + 1;
        let mut delay = self.opts.base_delay;
        let mut last = Error::transient("no attempt made");

        for attempt in 0..attempts {
            if attempt > 0 {
                self.instrument.incr_retry_count(op);
                sleep(self.jittered(delay)).await;
                delay = (delay * 2).min(self.opts.max_delay);
            }

            let error = match timeout(self.request_timeout, task()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => Error::Timeout(self.request_timeout),
            };

            if !error.is_retryable() {
                return Err(error);
            }

            warn!(op, attempt, error = %error, "remote call failed, will retry");
            last = error;
        }

        Err(Error::RetriesExhausted {
            attempts,
            source: Box::new(last),
        })
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.opts.jitter || delay.is_zero() {
            return delay;
        }
        // Uniform in [delay/2, delay], at nanosecond resolution so short
        // base delays keep a meaningful spread.
        let mut rng = StdRng::from_entropy();
        let half = (delay.as_nanos() / 2) as u64;
        Duration::from_nanos(half + rng.gen_range(0..=half))
    }
}
