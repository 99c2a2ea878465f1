// Socket forwarding and reuse through the engine factory

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{remote_options, SpyForwarder};
use dockspace::engine::EngineFactory;
use dockspace::options::ConnectionOptions;
use dockspace::paths::forwarded_socket_path;
use dockspace::Error;
use tempfile::TempDir;

#[tokio::test]
async fn test_local_options_never_forward() {
    let dir = TempDir::new().unwrap();
    let spy = SpyForwarder::new();
    let factory = EngineFactory::new(dir.path(), spy.clone());

    let (options, is_local) = ConnectionOptions::resolve("{}").unwrap();
    assert!(is_local);

    let err = factory.ensure_forwarded_socket(&options).await.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(spy.calls(), 0);
    assert_eq!(factory.tunnel_count().await, 0);
}

#[tokio::test]
async fn test_forwarded_socket_is_reused() {
    let dir = TempDir::new().unwrap();
    let spy = SpyForwarder::new();
    let factory = EngineFactory::new(dir.path(), spy.clone());
    let options = remote_options("build-host");

    let first = factory.ensure_forwarded_socket(&options).await.unwrap();
    let second = factory.ensure_forwarded_socket(&options).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first, forwarded_socket_path(dir.path(), "build-host"));
    assert!(first.exists());
    assert_eq!(spy.calls(), 1);
    assert_eq!(factory.tunnel_count().await, 1);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_tunnel() {
    let dir = TempDir::new().unwrap();
    let spy = SpyForwarder::with_delay(Duration::from_millis(50));
    let factory = Arc::new(EngineFactory::new(dir.path(), spy.clone()));
    let options = remote_options("build-host");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let factory = factory.clone();
        let options = options.clone();
        handles.push(tokio::spawn(async move {
            factory.ensure_forwarded_socket(&options).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(spy.calls(), 1);
}

#[tokio::test]
async fn test_vanished_socket_is_reforwarded() {
    let dir = TempDir::new().unwrap();
    let spy = SpyForwarder::new();
    let factory = EngineFactory::new(dir.path(), spy.clone());
    let options = remote_options("build-host");

    let path = factory.ensure_forwarded_socket(&options).await.unwrap();
    std::fs::remove_file(&path).unwrap();

    let again = factory.ensure_forwarded_socket(&options).await.unwrap();
    assert_eq!(path, again);
    assert_eq!(spy.calls(), 2);
    // The stale entry was replaced, not duplicated.
    assert_eq!(factory.tunnel_count().await, 1);
}

#[tokio::test]
async fn test_hosts_get_separate_sockets() {
    let dir = TempDir::new().unwrap();
    let spy = SpyForwarder::new();
    let factory = EngineFactory::new(dir.path(), spy.clone());

    let a = factory
        .ensure_forwarded_socket(&remote_options("host-a"))
        .await
        .unwrap();
    let b = factory
        .ensure_forwarded_socket(&remote_options("host-b"))
        .await
        .unwrap();

    assert_ne!(a, b);
    assert_eq!(spy.calls(), 2);
}

#[tokio::test]
async fn test_close_tunnels_cancels_forwarders() {
    let dir = TempDir::new().unwrap();
    let spy = SpyForwarder::new();
    let factory = EngineFactory::new(dir.path(), spy.clone());

    let path = factory
        .ensure_forwarded_socket(&remote_options("build-host"))
        .await
        .unwrap();
    factory.close_tunnels().await;
    assert_eq!(factory.tunnel_count().await, 0);

    // The spy removes its socket once cancelled.
    for _ in 0..100 {
        if !path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!path.exists());
}
