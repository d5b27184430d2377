//! Manager role against throwaway script "binaries": spawn, graceful
//! termination, forced kill of a signal-ignoring worker, and respawn of
//! a worker that dies on its own.

use crate::common::fake_script;
use overseer::{Config, Overseer, StatusKind};
use std::time::{Duration, Instant};

fn manager_config(binary: std::path::PathBuf, rpc_port: u16) -> Config {
    Config {
        addresses: vec!["127.0.0.1:0".into()],
        binary_path: Some(binary),
        rpc_port,
        terminate_timeout: Duration::from_secs(1),
        // Long interval: these tests exercise lifecycle, not fetching.
        fetch_interval: Duration::from_secs(3600),
        ..Config::default()
    }
}

#[tokio::test]
async fn cooperative_worker_terminates_within_grace_period() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_script(dir.path(), "app", "exec sleep 30");

    let overseer = Overseer::new(manager_config(binary, 46101)).unwrap();
    let mut handle = overseer.run(|_| async { Ok(()) }).await.unwrap();

    assert_eq!(overseer.status().await.unwrap().kind, StatusKind::Running);

    let started = Instant::now();
    handle.shutdown().await;
    let elapsed = started.elapsed();

    // SIGTERM lands and sleep dies immediately, far inside the grace
    // period.
    assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");
    assert_eq!(overseer.status().await.unwrap().kind, StatusKind::Destroyed);
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn stubborn_worker_is_force_killed_after_timeout() {
    let dir = tempfile::tempdir().unwrap();
    // Ignores the graceful signal entirely.
    let binary = fake_script(dir.path(), "app", "trap '' TERM\nsleep 30");

    let overseer = Overseer::new(manager_config(binary, 46102)).unwrap();
    let handle = overseer.run(|_| async { Ok(()) }).await.unwrap();

    let started = Instant::now();
    handle.shutdown().await;
    let elapsed = started.elapsed();

    // Bounded by terminate_timeout + ε: the grace period expires, then
    // the kill is immediate.
    assert!(elapsed >= Duration::from_secs(1), "took {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
}

#[tokio::test]
async fn crashed_worker_is_respawned() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("spawn-count");
    // Records each spawn, then exits immediately.
    let binary = fake_script(
        dir.path(),
        "app",
        &format!("echo spawned >> {}\nexit 0", marker.display()),
    );

    let overseer = Overseer::new(manager_config(binary, 46103)).unwrap();
    let handle = overseer.run(|_| async { Ok(()) }).await.unwrap();

    // Watcher poll (500ms) + respawn delay (1s) per cycle; two cycles
    // fit comfortably in four seconds.
    tokio::time::sleep(Duration::from_secs(4)).await;
    handle.shutdown().await;

    let spawns = std::fs::read_to_string(&marker).unwrap().lines().count();
    assert!(spawns >= 2, "worker spawned {spawns} time(s), expected respawn");
}

#[tokio::test]
async fn manager_exposes_latest_version_without_fetchers() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_script(dir.path(), "app", "exec sleep 30");

    let overseer = Overseer::new(manager_config(binary, 46104)).unwrap();
    let handle = overseer.run(|_| async { Ok(()) }).await.unwrap();

    assert!(overseer.latest_version_info().await.unwrap().is_none());
    handle.shutdown().await;
}
