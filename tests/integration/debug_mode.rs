//! Same-process debug mode through the public facade: the manager logic
//! and the program share one process, upgrades replace the binary on
//! disk but never restart anything.

#![cfg(unix)]

use crate::common::{asset_info, fake_binary};
use overseer::fetcher::AssetReader;
use overseer::fetcher::func::FuncFetcher;
use overseer::{Config, Overseer, StatusKind};
use std::time::Duration;

fn serving_fetcher(name: &'static str, version: &'static str, bytes: &'static [u8]) -> FuncFetcher {
    FuncFetcher::new(name, "v1.0.0", move |include| async move {
        let reader: Option<AssetReader> =
            include.then(|| Box::new(std::io::Cursor::new(bytes)) as AssetReader);
        Ok(Some((asset_info(name, version), reader)))
    })
}

fn debug_config(binary: std::path::PathBuf, fetcher: FuncFetcher) -> Config {
    Config {
        debug: true,
        addresses: vec!["127.0.0.1:0".into()],
        binary_path: Some(binary),
        fetchers: vec![Box::new(fetcher)],
        // Long interval: the tests drive checks manually via upgrade().
        fetch_interval: Duration::from_secs(3600),
        ..Config::default()
    }
}

#[tokio::test]
async fn program_runs_with_bound_listeners() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_binary(dir.path(), "app", b"binary-v1");

    let (tx, rx) = tokio::sync::oneshot::channel();
    let overseer = Overseer::new(debug_config(
        binary,
        serving_fetcher("feed", "v2.0.0", b"binary-v2"),
    ))
    .unwrap();

    let mut handle = overseer
        .run(move |state| async move {
            let port = state.listeners[0].local_addr()?.port();
            tx.send(port).ok();
            Ok(())
        })
        .await
        .unwrap();

    let port = rx.await.expect("program should report its port");
    assert!(port > 0);
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn manual_upgrade_replaces_binary_without_restart() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_binary(dir.path(), "app", b"binary-v1");

    let overseer = Overseer::new(debug_config(
        binary.clone(),
        serving_fetcher("feed", "v2.0.0", b"binary-v2"),
    ))
    .unwrap();
    let handle = overseer.run(|_| async { Ok(()) }).await.unwrap();

    assert_eq!(overseer.status().await.unwrap().kind, StatusKind::Running);

    let message = overseer.upgrade("feed").await.unwrap();
    assert!(message.contains("restart required"), "got: {message}");
    assert_eq!(std::fs::read(&binary).unwrap(), b"binary-v2");

    let latest = overseer.latest_version_info().await.unwrap().unwrap();
    assert_eq!(latest.version, "v2.0.0");
    assert_eq!(latest.fetcher, "feed");

    // Still running: debug mode never restarts anything.
    assert_eq!(overseer.status().await.unwrap().kind, StatusKind::Running);

    handle.shutdown().await;
    assert_eq!(overseer.status().await.unwrap().kind, StatusKind::Destroyed);
}

#[tokio::test]
async fn identical_bytes_leave_binary_and_status_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_binary(dir.path(), "app", b"binary-v1");

    // Newer version string, byte-identical payload.
    let overseer = Overseer::new(debug_config(
        binary.clone(),
        serving_fetcher("feed", "v2.0.0", b"binary-v1"),
    ))
    .unwrap();
    let _handle = overseer.run(|_| async { Ok(()) }).await.unwrap();

    let message = overseer.upgrade("feed").await.unwrap();
    assert!(message.contains("byte-identical"), "got: {message}");
    assert_eq!(std::fs::read(&binary).unwrap(), b"binary-v1");
    assert_eq!(overseer.status().await.unwrap().kind, StatusKind::Running);

    // Running the pipeline twice performs no replacement either time.
    let message = overseer.upgrade("feed").await.unwrap();
    assert!(message.contains("byte-identical"), "got: {message}");
    assert_eq!(std::fs::read(&binary).unwrap(), b"binary-v1");
}

#[tokio::test]
async fn unknown_fetcher_name_is_a_typed_error() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_binary(dir.path(), "app", b"binary-v1");

    let overseer = Overseer::new(debug_config(
        binary,
        serving_fetcher("feed", "v2.0.0", b"binary-v2"),
    ))
    .unwrap();
    let _handle = overseer.run(|_| async { Ok(()) }).await.unwrap();

    let err = overseer.upgrade("no-such-feed").await.unwrap_err();
    assert!(matches!(err, overseer::OverseerError::UnknownFetcher(_)));
}

#[tokio::test]
async fn run_is_single_shot() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_binary(dir.path(), "app", b"binary-v1");

    let overseer = Overseer::new(debug_config(
        binary,
        serving_fetcher("feed", "v2.0.0", b"binary-v2"),
    ))
    .unwrap();
    let _handle = overseer.run(|_| async { Ok(()) }).await.unwrap();

    let err = overseer.run(|_| async { Ok(()) }).await.unwrap_err();
    assert!(matches!(err, overseer::OverseerError::NotRunning(_)));
}
