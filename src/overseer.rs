//! The facade: role selection, wiring, and the public API surface.
//!
//! One binary, two processes. The hosting application calls
//! [`Overseer::run`] from its `main`; the environment markers decide
//! which half of the supervisor this process becomes:
//!
//! - no marker (or the manager marker): **manager** - spawn the worker,
//!   host the RPC server, poll fetchers, drive upgrades
//! - worker marker: **worker** - verify the binary, bind listeners, run
//!   the program, proxy API calls to the manager over RPC
//! - `Config::debug`: **same-process debug mode** - manager logic and
//!   program in one process, no subprocess, no RPC
//!
//! Every collaborator is owned by the `Overseer` instance and passed by
//! reference; there are no package-level singletons to reach for.

use crate::config::Config;
use crate::core::{ENV_IS_WORKER, OverseerError, env_marker};
use crate::fetcher::AssetInfo;
use crate::manager::{Manager, ManagerHandler, ManagerOptions};
use crate::rpc::client::RpcClient;
use crate::rpc::server::{RpcHandler, RpcServer};
use crate::status::Status;
use crate::worker::{self, Program, ProgramState, Worker};
use anyhow::Context;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Which half of the supervisor this process runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Manager,
    Worker,
    Debug,
}

fn detect_role(debug: bool) -> Role {
    if env_marker(ENV_IS_WORKER) {
        Role::Worker
    } else if debug {
        Role::Debug
    } else {
        // The manager marker or no marker at all: a bare invocation of
        // the hosting binary supervises.
        Role::Manager
    }
}

enum Runtime {
    Manager {
        manager: Arc<Manager>,
        rpc: Arc<RpcServer>,
    },
    Worker {
        client: Arc<RpcClient>,
    },
    Debug {
        manager: Arc<Manager>,
    },
}

/// The self-upgrading process supervisor.
///
/// # Examples
///
/// ```rust,no_run
/// use overseer::{Config, Overseer};
/// use overseer::fetcher::github::GithubFetcher;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let overseer = Overseer::new(Config {
///         addresses: vec!["0.0.0.0:8080".into()],
///         fetchers: vec![Box::new(GithubFetcher::new(
///             "acme",
///             "widgetd",
///             env!("CARGO_PKG_VERSION"),
///         ))],
///         ..Config::default()
///     })?;
///
///     let mut handle = overseer
///         .run(|state| async move {
///             // serve on state.listeners here
///             let _ = state.listeners;
///             Ok(())
///         })
///         .await?;
///     handle.wait().await
/// }
/// ```
pub struct Overseer {
    config: Mutex<Option<Config>>,
    runtime: OnceLock<Runtime>,
}

impl Overseer {
    /// Validate and default the configuration. Fails fast, before any
    /// process is spawned or socket bound.
    pub fn new(mut config: Config) -> Result<Self, OverseerError> {
        config.validate_and_default()?;
        Ok(Self {
            config: Mutex::new(Some(config)),
            runtime: OnceLock::new(),
        })
    }

    /// Start this process in its detected role and return a handle for
    /// shutdown sequencing. Can only be called once per instance.
    pub async fn run<F, Fut>(&self, program: F) -> Result<ShutdownHandle, OverseerError>
    where
        F: FnOnce(ProgramState) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let config = self
            .config
            .lock()
            .expect("config lock poisoned")
            .take()
            .ok_or(OverseerError::NotRunning("run may only be called once"))?;

        let program: Program = Box::new(move |state| Box::pin(program(state)));
        let role = detect_role(config.debug);
        debug!(?role, "starting overseer");

        match role {
            Role::Manager => self.run_manager(config).await,
            Role::Worker => self.run_worker(config, program).await,
            Role::Debug => self.run_debug(config, program).await,
        }
    }

    async fn run_manager(&self, mut config: Config) -> Result<ShutdownHandle, OverseerError> {
        let rpc_port = config.rpc_port;
        let fetchers = std::mem::take(&mut config.fetchers);
        let manager = Manager::initial(fetchers, manager_options(config, true))
            .await
            .map_err(startup_error)?;

        let handler: Arc<dyn RpcHandler> =
            Arc::new(ManagerHandler(Arc::clone(&manager))) as Arc<dyn RpcHandler>;
        let rpc = match RpcServer::bind(rpc_port, handler).await {
            Ok(rpc) => Arc::new(rpc),
            Err(e) => {
                manager.destroy().await;
                return Err(OverseerError::Rpc(format!("{e:#}")));
            }
        };
        info!(port = rpc.local_addr().port(), "manager running");

        let handle = ShutdownHandle {
            manager: Some(Arc::clone(&manager)),
            rpc: Some(Arc::clone(&rpc)),
            task: None,
        };
        let _ = self.runtime.set(Runtime::Manager { manager, rpc });
        Ok(handle)
    }

    async fn run_worker(
        &self,
        config: Config,
        program: Program,
    ) -> Result<ShutdownHandle, OverseerError> {
        let client = Arc::new(RpcClient::new(config.rpc_port));

        let worker = Worker::initial(config.addresses)
            .await
            .map_err(startup_error)?;
        info!("worker running");

        let task = tokio::spawn(worker.run(program));
        let handle = ShutdownHandle {
            manager: None,
            rpc: None,
            task: Some(task),
        };
        let _ = self.runtime.set(Runtime::Worker { client });
        Ok(handle)
    }

    async fn run_debug(
        &self,
        mut config: Config,
        program: Program,
    ) -> Result<ShutdownHandle, OverseerError> {
        let addresses = config.addresses.clone();
        let fetchers = std::mem::take(&mut config.fetchers);
        let manager = Manager::initial(fetchers, manager_options(config, false))
            .await
            .map_err(startup_error)?;

        let listeners = worker::bind_addresses(&addresses)
            .await
            .map_err(startup_error)?;
        info!("debug mode: manager and program share this process");

        let task = tokio::spawn(program(ProgramState {
            listeners,
            addresses,
        }));
        let handle = ShutdownHandle {
            manager: Some(Arc::clone(&manager)),
            rpc: None,
            task: Some(task),
        };
        let _ = self.runtime.set(Runtime::Debug { manager });
        Ok(handle)
    }

    /// Trigger an immediate version check on the named fetcher and
    /// return its outcome message.
    pub async fn upgrade(&self, fetcher_name: &str) -> Result<String, OverseerError> {
        match self.runtime() {
            Runtime::Manager { manager, .. } | Runtime::Debug { manager } => {
                manager.upgrade(fetcher_name).await
            }
            Runtime::Worker { client } => client.upgrade(fetcher_name).await,
        }
    }

    /// Snapshot the supervisor status.
    pub async fn status(&self) -> Result<Status, OverseerError> {
        match self.runtime() {
            Runtime::Manager { manager, .. } | Runtime::Debug { manager } => Ok(manager.status()),
            Runtime::Worker { client } => client.status().await,
        }
    }

    /// The newest release any fetcher has reported, if any.
    pub async fn latest_version_info(&self) -> Result<Option<AssetInfo>, OverseerError> {
        match self.runtime() {
            Runtime::Manager { manager, .. } | Runtime::Debug { manager } => {
                Ok(manager.latest_version_info())
            }
            Runtime::Worker { client } => client.latest_version_info().await,
        }
    }

    fn runtime(&self) -> &Runtime {
        self.runtime
            .get()
            .expect("overseer operations require run() to have been called")
    }
}

/// Map a startup failure to its typed form where one exists (integrity
/// and replace errors carry their own variants), or to a configuration
/// error otherwise.
fn startup_error(e: anyhow::Error) -> OverseerError {
    match e.downcast::<OverseerError>() {
        Ok(typed) => typed,
        Err(e) => OverseerError::Config(format!("{e:#}")),
    }
}

fn manager_options(config: Config, spawn_worker: bool) -> ManagerOptions {
    ManagerOptions {
        terminate_timeout: config.terminate_timeout,
        fetch_interval: config.fetch_interval,
        fetch_timeout: config.fetch_timeout,
        terminate_signal: config.terminate_signal,
        pre_upgrade: config.pre_upgrade,
        on_new_version: config.on_new_version,
        spawn_worker,
        binary_path: config.binary_path,
    }
}

/// Handle returned by [`Overseer::run`]; owns shutdown sequencing.
pub struct ShutdownHandle {
    manager: Option<Arc<Manager>>,
    rpc: Option<Arc<RpcServer>>,
    task: Option<JoinHandle<anyhow::Result<()>>>,
}

impl ShutdownHandle {
    /// Tear the supervisor down: destroy the manager (terminating the
    /// worker with the configured grace period), stop the RPC server,
    /// and stop the program task. Idempotent, best effort.
    pub async fn shutdown(&self) {
        if let Some(manager) = &self.manager {
            manager.destroy().await;
        }
        if let Some(rpc) = &self.rpc {
            rpc.shutdown();
        }
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    /// Block until this role's lifetime ends: the program returns
    /// (worker and debug mode) or the manager is destroyed.
    pub async fn wait(&mut self) -> anyhow::Result<()> {
        if let Some(task) = self.task.take() {
            return match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Ok(()),
                Err(e) => Err(e).context("program task failed"),
            };
        }
        if let Some(manager) = &self.manager {
            let mut destroyed = manager.shutdown_signal();
            while !*destroyed.borrow() {
                if destroyed.changed().await.is_err() {
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_detection_prefers_worker_marker() {
        // Markers unset in the test environment: a plain process is a
        // manager, and the debug flag overrides that.
        assert_eq!(detect_role(false), Role::Manager);
        assert_eq!(detect_role(true), Role::Debug);
    }

    #[test]
    fn new_rejects_bad_config_before_any_spawn() {
        let result = Overseer::new(Config::default());
        assert!(matches!(result, Err(OverseerError::Config(_))));
    }

    #[tokio::test]
    #[should_panic(expected = "require run()")]
    async fn operations_before_run_panic_by_contract() {
        let overseer = Overseer::new(Config {
            addresses: vec!["127.0.0.1:0".into()],
            ..Config::default()
        })
        .unwrap();
        let _ = overseer.status().await;
    }
}
