use bytes::Bytes;
use futures::StreamExt;
use tokio::time::timeout;
use tokio::time::Duration;

use super::memory::MemoryTransport;
use crate::transport::KvTransport;
use crate::transport::WatchEventKind;
use crate::Error;

#[tokio::test]
async fn test_put_assigns_monotonic_versions() {
    let transport = MemoryTransport::new();

    assert_eq!(transport.put("a", Bytes::from("1")).await.unwrap(), 1);
    assert_eq!(transport.put("a", Bytes::from("2")).await.unwrap(), 2);
    // Independent keys have independent version sequences.
    assert_eq!(transport.put("b", Bytes::from("1")).await.unwrap(), 1);

    let got = transport.get("a").await.unwrap().unwrap();
    assert_eq!(got.value, Bytes::from("2"));
    assert_eq!(got.version, 2);
}

#[tokio::test]
async fn test_versions_survive_delete() {
    let transport = MemoryTransport::new();

    transport.put("a", Bytes::from("1")).await.unwrap();
    assert!(transport.delete("a").await.unwrap());
    assert!(!transport.delete("a").await.unwrap());
    assert!(transport.get("a").await.unwrap().is_none());

    // Recreate lands above every previously observed version.
    let version = transport.put("a", Bytes::from("again")).await.unwrap();
    assert!(version > 2);
}

#[tokio::test]
async fn test_put_if_version_enforces_expected_version() {
    let transport = MemoryTransport::new();

    // expected == 0 creates an absent key.
    assert_eq!(
        transport.put_if_version("k", Bytes::from("a"), 0).await.unwrap(),
        1
    );

    let err = transport
        .put_if_version("k", Bytes::from("b"), 0)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::VersionMismatch {
            expected: 0,
            actual: 1,
            ..
        }
    ));

    assert_eq!(
        transport.put_if_version("k", Bytes::from("b"), 1).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn test_watch_delivers_put_and_delete_events() {
    let transport = MemoryTransport::new();
    let mut stream = transport.watch("k").await.unwrap();

    transport.put("k", Bytes::from("v")).await.unwrap();
    transport.delete("k").await.unwrap();
    // Other keys never show up on this stream.
    transport.put("other", Bytes::from("x")).await.unwrap();

    let put = timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(put.kind, WatchEventKind::Put);
    assert_eq!(put.value, Bytes::from("v"));
    assert_eq!(put.version, 1);

    let delete = timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(delete.kind, WatchEventKind::Delete);
    assert_eq!(delete.version, 2);
}

#[tokio::test]
async fn test_fail_transient_rejects_all_calls() {
    let transport = MemoryTransport::new();
    transport.put("k", Bytes::from("v")).await.unwrap();

    transport.set_fail_transient(true);
    assert!(transport.get("k").await.unwrap_err().is_retryable());
    assert!(transport.put("k", Bytes::from("x")).await.unwrap_err().is_retryable());
    assert!(transport.watch("k").await.is_err());

    transport.set_fail_transient(false);
    let got = transport.get("k").await.unwrap().unwrap();
    assert_eq!(got.value, Bytes::from("v"));
}

#[tokio::test]
async fn test_fail_unauthorized_is_not_retryable() {
    let transport = MemoryTransport::new();
    transport.put("k", Bytes::from("v")).await.unwrap();

    transport.set_fail_unauthorized(true);
    let err = transport.get("k").await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
    assert!(!err.is_retryable());

    transport.set_fail_unauthorized(false);
    assert!(transport.get("k").await.unwrap().is_some());
}

#[tokio::test]
async fn test_mute_watch_applies_writes_silently() {
    let transport = MemoryTransport::new();
    let mut stream = transport.watch("k").await.unwrap();

    transport.set_mute_watch(true);
    transport.put("k", Bytes::from("hidden")).await.unwrap();

    // The write landed but no event was delivered.
    assert!(transport.get("k").await.unwrap().is_some());
    assert!(timeout(Duration::from_millis(50), stream.next()).await.is_err());
}
