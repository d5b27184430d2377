//! The manager: worker lifecycle, release polling, and the
//! fetch-compare-download-replace-restart upgrade pipeline.
//!
//! # State machine
//!
//! `Running ⇄ Restarting → Destroyed`, with `Upgrading` surfaced while a
//! download is streaming. `Destroyed` is terminal. Only one upgrade may
//! be in flight: the critical section is guarded by an async mutex, and
//! a version check that cannot take the lock - or that observes anything
//! other than `Running` - skips silently rather than queueing.
//!
//! # Loops
//!
//! One polling task per configured fetcher, each on a fixed interval
//! with a per-check deadline. A fetch failure is logged and the loop
//! continues at the next tick; fetchers are independent, so one broken
//! feed never silences the others. A lightweight watcher per spawned
//! worker respawns it if it exits outside an upgrade.

pub(crate) mod proxy;

use crate::config::{NewVersionHook, PreUpgradeHook};
use crate::core::hash::{hash_file, short_hash};
use crate::core::{ENV_IS_MANAGER, ENV_IS_WORKER, ENV_SHORT_BIN_HASH, OverseerError};
use crate::fetcher::{AssetInfo, AssetReader, Fetcher, UsedCallback};
use crate::platform;
use crate::rpc::server::RpcHandler;
use crate::status::{Status, StatusKind};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use proxy::WorkerProxy;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Copy-buffer size for streaming a downloaded binary to disk (256 KiB).
const COPY_CHUNK_SIZE: usize = 256 * 1024;

/// Poll cadence of the worker-exit watcher.
const WATCH_INTERVAL: Duration = Duration::from_millis(500);

/// Pause before respawning a worker that died outside an upgrade, so a
/// crash-looping binary cannot melt the host.
const RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// The slice of [`crate::config::Config`] the manager consumes.
pub(crate) struct ManagerOptions {
    pub terminate_timeout: Duration,
    pub fetch_interval: Duration,
    pub fetch_timeout: Duration,
    pub terminate_signal: Option<i32>,
    pub pre_upgrade: Option<PreUpgradeHook>,
    pub on_new_version: Option<NewVersionHook>,
    /// `false` in same-process debug mode: no subprocess is spawned and
    /// a completed upgrade only logs that a restart is required.
    pub spawn_worker: bool,
    /// Executable under management; `None` means the current executable.
    pub binary_path: Option<PathBuf>,
}

/// Outcome of a single version check, used to build upgrade messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CheckOutcome {
    /// Another check holds the critical section, or the manager is not
    /// `Running`.
    Skipped,
    /// The fetcher reported nothing newer.
    NoUpdate,
    /// A newer release exists but no platform artifact was available.
    InfoOnly(String),
    /// The downloaded bytes hash identically to the running binary.
    Identical,
    /// The executable was replaced (and the worker restarted, unless in
    /// debug mode).
    Upgraded(String),
}

#[derive(Clone)]
struct FetcherSlot {
    name: String,
    fetcher: Arc<tokio::sync::Mutex<Box<dyn Fetcher>>>,
}

/// Supervisor core. Owns the worker process, the binary identity
/// (path + content hash + permissions), and all upgrade machinery.
pub(crate) struct Manager {
    opts: ManagerOptions,
    bin_path: PathBuf,
    bin_hash: RwLock<String>,
    state: RwLock<StatusKind>,
    progress: RwLock<BTreeMap<String, serde_json::Value>>,
    latest: RwLock<Option<AssetInfo>>,
    /// Serializes the upgrade critical section; see module docs.
    upgrade_lock: tokio::sync::Mutex<()>,
    fetchers: Vec<FetcherSlot>,
    worker: tokio::sync::Mutex<Option<WorkerProxy>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Manager {
    /// Build the manager: record binary identity, initialize every
    /// fetcher, perform the one mandatory worker spawn, and start the
    /// polling loops. Any failure here is fatal to startup.
    pub(crate) async fn initial(
        mut fetchers: Vec<Box<dyn Fetcher>>,
        opts: ManagerOptions,
    ) -> Result<Arc<Self>> {
        let bin_path = match &opts.binary_path {
            Some(path) => path.clone(),
            None => std::env::current_exe().context("failed to resolve own executable path")?,
        };
        ensure_executable(&bin_path)?;

        let bin_hash = hash_file(&bin_path)
            .await
            .context("failed to hash managed binary")?;
        debug!(path = %bin_path.display(), hash = short_hash(&bin_hash), "managing binary");

        for fetcher in &mut fetchers {
            fetcher
                .init()
                .with_context(|| format!("fetcher '{}' failed to initialize", fetcher.name()))?;
        }

        let (shutdown_tx, _) = watch::channel(false);
        let manager = Arc::new(Self {
            opts,
            bin_path,
            bin_hash: RwLock::new(bin_hash),
            state: RwLock::new(StatusKind::Running),
            progress: RwLock::new(BTreeMap::new()),
            latest: RwLock::new(None),
            upgrade_lock: tokio::sync::Mutex::new(()),
            fetchers: fetchers
                .into_iter()
                .map(|fetcher| FetcherSlot {
                    name: fetcher.name().to_string(),
                    fetcher: Arc::new(tokio::sync::Mutex::new(fetcher)),
                })
                .collect(),
            worker: tokio::sync::Mutex::new(None),
            shutdown_tx,
        });

        if manager.opts.spawn_worker {
            manager
                .spawn_worker()
                .await
                .context("initial worker spawn failed")?;
        }
        manager.start_polling();

        Ok(manager)
    }

    /// Public status snapshot, derived from the internal state machine.
    pub(crate) fn status(&self) -> Status {
        let kind = *self.state.read().expect("state lock poisoned");
        let mut status = Status::new(kind);
        if kind == StatusKind::Upgrading {
            status.extra = self.progress.read().expect("progress lock poisoned").clone();
        }
        status
    }

    /// The newest release any fetcher has reported.
    pub(crate) fn latest_version_info(&self) -> Option<AssetInfo> {
        self.latest.read().expect("latest lock poisoned").clone()
    }

    /// Trigger an immediate version check on the named fetcher and
    /// report the outcome.
    pub(crate) async fn upgrade(self: &Arc<Self>, fetcher_name: &str) -> Result<String, OverseerError> {
        if self.state() == StatusKind::Destroyed {
            return Err(OverseerError::Destroyed);
        }
        let slot = self
            .fetchers
            .iter()
            .find(|s| s.name == fetcher_name)
            .cloned()
            .ok_or_else(|| OverseerError::UnknownFetcher(fetcher_name.to_string()))?;

        let outcome = self
            .check_new_version(&slot)
            .await
            .map_err(|e| match e.downcast::<OverseerError>() {
                // Typed pipeline errors (e.g. Replace) pass through.
                Ok(typed) => typed,
                Err(e) => OverseerError::fetch(fetcher_name, format!("{e:#}")),
            })?;

        Ok(match outcome {
            CheckOutcome::Skipped => return Err(OverseerError::UpgradeInProgress),
            CheckOutcome::NoUpdate => "no update available".to_string(),
            CheckOutcome::InfoOnly(version) => {
                format!("{version} is available but has no artifact for this platform")
            }
            CheckOutcome::Identical => {
                "latest release is byte-identical to the running binary".to_string()
            }
            CheckOutcome::Upgraded(version) => {
                if self.opts.spawn_worker {
                    format!("upgraded to {version}, worker restarted")
                } else {
                    format!("upgraded to {version}, restart required")
                }
            }
        })
    }

    /// Tear down: terminal state, stop polling, best-effort worker
    /// termination. Idempotent.
    pub(crate) async fn destroy(&self) {
        {
            let mut state = self.state.write().expect("state lock poisoned");
            if *state == StatusKind::Destroyed {
                return;
            }
            *state = StatusKind::Destroyed;
        }
        info!("manager destroyed, stopping polling and worker");
        let _ = self.shutdown_tx.send(true);
        self.terminate_worker().await;
    }

    fn state(&self) -> StatusKind {
        *self.state.read().expect("state lock poisoned")
    }

    /// Receiver that flips to `true` once the manager is destroyed.
    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Transition the state machine; `Destroyed` is never overwritten.
    fn set_state(&self, next: StatusKind) {
        let mut state = self.state.write().expect("state lock poisoned");
        if *state != StatusKind::Destroyed {
            *state = next;
        }
    }

    fn publish_progress(&self, version: &str, downloaded: u64) {
        let mut progress = self.progress.write().expect("progress lock poisoned");
        progress.insert("version".into(), serde_json::json!(version));
        progress.insert("bytes_downloaded".into(), serde_json::json!(downloaded));
    }

    fn clear_progress(&self) {
        self.progress.write().expect("progress lock poisoned").clear();
    }

    fn start_polling(self: &Arc<Self>) {
        for slot in &self.fetchers {
            let manager = Arc::clone(self);
            let slot = slot.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut timer = tokio::time::interval(manager.opts.fetch_interval);
                timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // interval() fires immediately; the first real check
                // happens one full interval after startup.
                timer.tick().await;
                loop {
                    tokio::select! {
                        _ = timer.tick() => {
                            if *shutdown.borrow() {
                                break;
                            }
                            match manager.check_new_version(&slot).await {
                                Ok(outcome) => {
                                    debug!(fetcher = %slot.name, ?outcome, "version check finished");
                                }
                                Err(e) => {
                                    warn!(fetcher = %slot.name, error = format!("{e:#}"), "version check failed");
                                }
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                debug!(fetcher = %slot.name, "polling loop stopped");
            });
        }
    }

    /// One full check of a single fetcher: fetch, gate, download, adopt.
    async fn check_new_version(self: &Arc<Self>, slot: &FetcherSlot) -> Result<CheckOutcome> {
        // Single upgrade in flight: a busy lock means another fetcher's
        // check got there first, and queueing behind it would only
        // re-download the same release.
        let Ok(_guard) = self.upgrade_lock.try_lock() else {
            debug!(fetcher = %slot.name, "upgrade in flight, skipping check");
            return Ok(CheckOutcome::Skipped);
        };
        if self.state() != StatusKind::Running {
            return Ok(CheckOutcome::Skipped);
        }

        let fetched = {
            let mut fetcher = slot.fetcher.lock().await;
            tokio::time::timeout(self.opts.fetch_timeout, fetcher.fetch(true))
                .await
                .map_err(|_| {
                    anyhow!(
                        "fetch timed out after {:?}",
                        self.opts.fetch_timeout
                    )
                })??
        };

        let Some(fetched) = fetched else {
            return Ok(CheckOutcome::NoUpdate);
        };
        let info = fetched.info.clone();
        self.record_latest(&info);

        let Some(reader) = fetched.reader else {
            return Ok(CheckOutcome::InfoOnly(info.version));
        };

        self.set_state(StatusKind::Upgrading);
        let adopted = self.adopt_binary(&info, reader, fetched.used).await;
        self.clear_progress();

        match adopted {
            Ok(true) => {
                if self.opts.spawn_worker {
                    self.upgrade_worker().await?;
                } else {
                    info!(version = %info.version, "binary replaced; restart required to run it");
                    self.set_state(StatusKind::Running);
                }
                Ok(CheckOutcome::Upgraded(info.version))
            }
            Ok(false) => {
                self.set_state(StatusKind::Running);
                Ok(CheckOutcome::Identical)
            }
            Err(e) => {
                self.set_state(StatusKind::Running);
                Err(e)
            }
        }
    }

    /// Remember the newest release seen and fire the new-version hook on
    /// first sight of each version.
    fn record_latest(&self, info: &AssetInfo) {
        let mut latest = self.latest.write().expect("latest lock poisoned");
        let is_new = latest.as_ref().map(|l| l.version != info.version).unwrap_or(true);
        *latest = Some(info.clone());
        drop(latest);

        if is_new {
            info!(fetcher = %info.fetcher, version = %info.version, "new release found");
            if let Some(hook) = &self.opts.on_new_version {
                hook(info);
            }
        }
    }

    /// Stream the fetched binary to a scratch file, hash it, and - if it
    /// differs from the running binary - swap it in. Returns whether a
    /// replacement happened; `false` is the idempotence guard that
    /// prevents restart storms when the remote asset is byte-identical.
    async fn adopt_binary(
        &self,
        info: &AssetInfo,
        mut reader: AssetReader,
        used: Option<UsedCallback>,
    ) -> Result<bool> {
        let dir = self
            .bin_path
            .parent()
            .context("managed binary has no parent directory")?;
        // Scratch lives next to the destination so the final rename
        // stays on one filesystem.
        let mut scratch = platform::scratch_binary_file(dir)
            .context("failed to create scratch file for download")?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut buf = vec![0u8; COPY_CHUNK_SIZE];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .context("failed to read fetched binary")?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            scratch
                .as_file_mut()
                .write_all(&buf[..n])
                .context("failed to write scratch file")?;
            downloaded += n as u64;
            self.publish_progress(&info.version, downloaded);
        }
        scratch.as_file_mut().flush()?;

        let new_hash = hex::encode(hasher.finalize());
        let current_hash = self.bin_hash.read().expect("hash lock poisoned").clone();
        if new_hash == current_hash {
            debug!(
                version = %info.version,
                "downloaded binary is identical to the running one, discarding"
            );
            return Ok(false);
        }

        if let Some(hook) = &self.opts.pre_upgrade {
            hook(info).context("pre-upgrade hook rejected the upgrade")?;
        }

        platform::mirror_binary_metadata(&self.bin_path, scratch.path())
            .context("failed to mirror binary permissions")?;

        // Keep the file but drop the handle: some platforms lock open
        // files against rename.
        let (file, scratch_path) = scratch
            .keep()
            .context("failed to persist scratch file")?;
        drop(file);

        if let Err(e) = platform::replace_executable(&scratch_path, &self.bin_path) {
            let _ = std::fs::remove_file(&scratch_path);
            return Err(OverseerError::Replace {
                path: self.bin_path.clone(),
                source: e,
            }
            .into());
        }

        *self.bin_hash.write().expect("hash lock poisoned") = new_hash;
        if let Some(used) = used {
            used();
        }
        info!(version = %info.version, path = %self.bin_path.display(), "executable replaced");
        Ok(true)
    }

    /// Restart the worker on the freshly replaced binary.
    async fn upgrade_worker(self: &Arc<Self>) -> Result<()> {
        self.set_state(StatusKind::Restarting);
        self.terminate_worker().await;
        self.spawn_worker()
            .await
            .context("failed to spawn upgraded worker")?;
        // Running only after the new worker is confirmed started; a
        // failed spawn leaves Restarting, which parks further checks.
        self.set_state(StatusKind::Running);
        Ok(())
    }

    /// Graceful-then-forced termination of the current worker, bounded
    /// by `terminate_timeout`. All failures are absorbed: the only
    /// postcondition is that the old process is gone.
    pub(crate) async fn terminate_worker(&self) {
        let Some(mut proxy) = self.worker.lock().await.take() else {
            return;
        };
        if proxy.try_exited().is_some() {
            debug!(pid = proxy.pid(), "worker already exited");
            return;
        }

        if let Err(e) = platform::send_graceful_shutdown(proxy.pid(), self.opts.terminate_signal) {
            warn!(pid = proxy.pid(), error = %e, "failed to signal worker, killing");
            proxy.kill().await;
            return;
        }

        tokio::select! {
            result = proxy.wait() => {
                match result {
                    Ok(status) => debug!(pid = proxy.pid(), %status, "worker exited gracefully"),
                    Err(e) => warn!(pid = proxy.pid(), error = %e, "wait on worker failed"),
                }
            }
            _ = tokio::time::sleep(self.opts.terminate_timeout) => {
                warn!(
                    pid = proxy.pid(),
                    timeout = ?self.opts.terminate_timeout,
                    "worker ignored termination signal, killing"
                );
                proxy.kill().await;
                if platform::process_alive(proxy.pid()) {
                    error!(pid = proxy.pid(), "worker survived forced kill");
                }
            }
        }
    }

    /// Spawn the worker: own executable, argv[1:], inherited stdio, and
    /// the three environment markers.
    async fn spawn_worker(self: &Arc<Self>) -> Result<()> {
        let short = {
            let hash = self.bin_hash.read().expect("hash lock poisoned");
            short_hash(&hash).to_string()
        };

        let mut cmd = tokio::process::Command::new(&self.bin_path);
        cmd.args(std::env::args_os().skip(1))
            .envs(std::env::vars_os())
            .env(ENV_IS_WORKER, "true")
            .env(ENV_IS_MANAGER, "false")
            .env(ENV_SHORT_BIN_HASH, &short);
        platform::configure_command(&mut cmd);

        let child = cmd.spawn().context("failed to spawn worker process")?;
        let proxy = WorkerProxy::new(child)?;
        let pid = proxy.pid();
        info!(pid, hash = %short, "worker spawned");

        *self.worker.lock().await = Some(proxy);
        self.watch_worker(pid);
        Ok(())
    }

    /// Watch one spawned worker and respawn it if it exits outside an
    /// upgrade. The watcher retires as soon as its worker is replaced or
    /// taken for termination.
    fn watch_worker(self: &Arc<Self>, pid: u32) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(WATCH_INTERVAL).await;
                let Some(manager) = weak.upgrade() else {
                    return;
                };

                let mut guard = manager.worker.lock().await;
                match guard.as_mut() {
                    Some(proxy) if proxy.pid() == pid => {
                        let Some(status) = proxy.try_exited() else {
                            continue;
                        };
                        *guard = None;
                        drop(guard);

                        if manager.state() != StatusKind::Running {
                            return;
                        }
                        warn!(pid, %status, "worker exited unexpectedly, respawning");
                        tokio::time::sleep(RESPAWN_DELAY).await;
                        if let Err(e) = manager.spawn_worker().await {
                            error!(error = format!("{e:#}"), "failed to respawn worker");
                        }
                        return;
                    }
                    // Replaced by a newer worker or taken for
                    // termination; this watcher is done either way.
                    _ => return,
                }
            }
        });
    }
}

/// Adapts an `Arc<Manager>` to the [`RpcHandler`] trait. The `Arc` is
/// required so handler-triggered upgrades can reach the `Arc<Self>`
/// worker-spawn path.
pub(crate) struct ManagerHandler(pub(crate) Arc<Manager>);

#[async_trait]
impl RpcHandler for ManagerHandler {
    async fn upgrade(&self, fetcher: &str) -> Result<String, String> {
        Manager::upgrade(&self.0, fetcher).await.map_err(|e| e.to_string())
    }

    async fn status(&self) -> Status {
        self.0.status()
    }

    async fn latest_version_info(&self) -> Option<AssetInfo> {
        self.0.latest_version_info()
    }
}

fn ensure_executable(path: &std::path::Path) -> Result<()> {
    let meta = std::fs::metadata(path)
        .map_err(|_| OverseerError::BinaryNotExecutable(path.to_path_buf()))?;
    if !meta.is_file() {
        return Err(OverseerError::BinaryNotExecutable(path.to_path_buf()).into());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(OverseerError::BinaryNotExecutable(path.to_path_buf()).into());
        }
    }
    Ok(())
}
