use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::RetryExecutor;
use crate::metrics::InstrumentSink;
use crate::metrics::NoopInstrument;
use crate::options::RetryOptions;
use crate::Error;

#[derive(Default)]
struct CountingSink {
    requests: AtomicUsize,
    retries: AtomicUsize,
}

impl InstrumentSink for CountingSink {
    fn incr_request_count(&self, _op: &'static str) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn observe_request_latency(&self, _op: &'static str, _latency: Duration) {}

    fn incr_retry_count(&self, _op: &'static str) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    fn incr_watch_reset_count(&self) {}

    fn incr_cache_hit_count(&self) {}

    fn incr_cache_miss_count(&self) {}
}

fn fast_retry(max_retries: usize) -> RetryOptions {
    RetryOptions {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        jitter: false,
    }
}

fn executor(max_retries: usize, sink: Arc<dyn InstrumentSink>) -> RetryExecutor {
    RetryExecutor::new(fast_retry(max_retries), Duration::from_millis(100), sink)
}

#[tokio::test]
async fn test_success_on_first_attempt() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();

    let result = executor(3, Arc::new(NoopInstrument))
        .execute("get", || {
            let calls = counted.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            }
        })
        .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transient_errors_consume_budget_then_succeed() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let sink = Arc::new(CountingSink::default());

    let result = executor(3, sink.clone())
        .execute("get", || {
            let calls = counted.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::transient("unavailable"))
                } else {
                    Ok("value")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "value");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(sink.requests.load(Ordering::SeqCst), 1);
    assert_eq!(sink.retries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_exhaustion_makes_max_retries_plus_one_attempts() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();

    let result: Result<(), _> = executor(5, Arc::new(NoopInstrument))
        .execute("get", || {
            let calls = counted.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::transient("always down"))
            }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 6);
    match result.unwrap_err() {
        Error::RetriesExhausted { attempts, source } => {
            assert_eq!(attempts, 6);
            assert!(source.is_retryable());
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_non_retryable_error_fails_fast() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let sink = Arc::new(CountingSink::default());

    let result: Result<(), _> = executor(5, sink.clone())
        .execute("cas", || {
            let calls = counted.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::VersionMismatch {
                    key: "k".into(),
                    expected: 1,
                    actual: 2,
                })
            }
        })
        .await;

    assert!(matches!(result.unwrap_err(), Error::VersionMismatch { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(sink.retries.load(Ordering::SeqCst), 0);
}

#[test]
fn test_jitter_keeps_short_delays_in_range() {
    let executor = RetryExecutor::new(
        RetryOptions {
            jitter: true,
            ..fast_retry(1)
        },
        Duration::from_millis(100),
        Arc::new(NoopInstrument),
    );

    // A 1ms delay must stay within [delay/2, delay] and never collapse
    // to zero.
    for _ in 0..64 {
        let jittered = executor.jittered(Duration::from_millis(1));
        assert!(jittered >= Duration::from_micros(500));
        assert!(jittered <= Duration::from_millis(1));
    }
}

#[tokio::test]
async fn test_slow_attempt_maps_to_timeout() {
    let executor = RetryExecutor::new(
        fast_retry(0),
        Duration::from_millis(10),
        Arc::new(NoopInstrument),
    );

    let result: Result<(), _> = executor
        .execute("get", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

    match result.unwrap_err() {
        Error::RetriesExhausted { source, .. } => {
            assert!(matches!(*source, Error::Timeout(_)))
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}
