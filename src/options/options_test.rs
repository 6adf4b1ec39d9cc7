use std::sync::Arc;
use std::time::Duration;

use super::Options;
use super::RetryOptions;
use crate::Error;

#[test]
fn test_default_options_validate() {
    let opts = Options::default();
    assert!(opts.validate().is_ok());
    assert_eq!(opts.request_timeout(), Duration::from_secs(10));
    assert_eq!(opts.watch_chan_check_interval(), Duration::from_secs(10));
    assert_eq!(opts.watch_chan_reset_interval(), Duration::from_secs(10));
    assert!(opts.cache_file_path().is_none());
}

#[test]
fn test_default_key_fn_is_identity() {
    let opts = Options::default();
    let key_fn = opts.key_fn().expect("default key fn");
    assert_eq!(key_fn("services/placement"), "services/placement");
}

#[test]
fn test_validate_rejects_missing_required_options() {
    let no_instrument = Options {
        instrument: None,
        ..Options::default()
    };
    assert!(matches!(
        no_instrument.validate(),
        Err(Error::Configuration(msg)) if msg.contains("instrument")
    ));

    let no_retry = Options {
        retry: None,
        ..Options::default()
    };
    assert!(matches!(
        no_retry.validate(),
        Err(Error::Configuration(msg)) if msg.contains("retry")
    ));

    let no_key_fn = Options {
        key_fn: None,
        ..Options::default()
    };
    assert!(matches!(
        no_key_fn.validate(),
        Err(Error::Configuration(msg)) if msg.contains("key function")
    ));
}

#[test]
fn test_validate_rejects_zero_check_interval() {
    let opts = Options::default().with_watch_chan_check_interval(Duration::ZERO);
    assert!(matches!(opts.validate(), Err(Error::Configuration(_))));
}

#[test]
fn test_setters_return_new_values() {
    let base = Options::default();

    let fast = base
        .clone()
        .with_request_timeout(Duration::from_secs(1))
        .with_retry(RetryOptions {
            max_retries: 1,
            ..RetryOptions::default()
        });
    let namespaced = base
        .clone()
        .with_key_fn(Arc::new(|key: &str| format!("_ns/prod/{key}")));

    // The base is untouched by either derivation.
    assert_eq!(base.request_timeout(), Duration::from_secs(10));
    assert_eq!(base.retry().unwrap().max_retries, 5);
    assert_eq!(base.key_fn().unwrap()("a"), "a");

    assert_eq!(fast.request_timeout(), Duration::from_secs(1));
    assert_eq!(fast.retry().unwrap().max_retries, 1);
    assert_eq!(namespaced.key_fn().unwrap()("a"), "_ns/prod/a");
}
