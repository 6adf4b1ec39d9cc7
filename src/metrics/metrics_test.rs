use std::time::Duration;

use prometheus::Registry;

use super::InstrumentSink;
use super::PrometheusInstrument;

fn counter_value(registry: &Registry, name: &str) -> f64 {
    registry
        .gather()
        .iter()
        .find(|family| family.get_name() == name)
        .map(|family| {
            family
                .get_metric()
                .iter()
                .map(|m| {
                    if m.has_counter() {
                        m.get_counter().get_value()
                    } else {
                        m.get_histogram().get_sample_count() as f64
                    }
                })
                .sum()
        })
        .unwrap_or(0.0)
}

#[test]
fn test_prometheus_sink_records_all_series() {
    let registry = Registry::new();
    let sink = PrometheusInstrument::register(&registry).unwrap();

    sink.incr_request_count("get");
    sink.incr_request_count("set");
    sink.observe_request_latency("get", Duration::from_millis(3));
    sink.incr_retry_count("get");
    sink.incr_watch_reset_count();
    sink.incr_cache_hit_count();
    sink.incr_cache_hit_count();
    sink.incr_cache_miss_count();

    assert_eq!(counter_value(&registry, "coordkv_request_count"), 2.0);
    assert_eq!(counter_value(&registry, "coordkv_request_latency_ms"), 1.0);
    assert_eq!(counter_value(&registry, "coordkv_retry_count"), 1.0);
    assert_eq!(counter_value(&registry, "coordkv_watch_reset_count"), 1.0);
    assert_eq!(counter_value(&registry, "coordkv_cache_hit_count"), 2.0);
    assert_eq!(counter_value(&registry, "coordkv_cache_miss_count"), 1.0);
}

#[test]
fn test_double_registration_is_a_configuration_error() {
    let registry = Registry::new();
    let _first = PrometheusInstrument::register(&registry).unwrap();
    assert!(PrometheusInstrument::register(&registry).is_err());
}
