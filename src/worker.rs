//! The worker: binds listeners and runs the hosting application's
//! program under a verified binary.
//!
//! A worker is a single-shot initializer, not a loop. Before it binds
//! anything it proves two things: that the binary it is running is the
//! one its manager launched (short-hash comparison against the
//! environment marker - a stale binary left by a failed replace must not
//! serve traffic), and that the manager is still alive (an orphaned
//! worker must not bind sockets a future manager will need). After that
//! the caller-supplied program owns the remainder of the process
//! lifetime.

use crate::core::hash::{hash_file, short_hash};
use crate::core::{ENV_SHORT_BIN_HASH, OverseerError};
use crate::platform;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Everything a worker hands to the hosting application's program: the
/// listeners it bound, in the order the addresses were configured.
pub struct ProgramState {
    /// Bound listeners, one per configured address.
    pub listeners: Vec<TcpListener>,
    /// The addresses the listeners were bound from, index-aligned with
    /// `listeners` (useful when binding `:0` ports).
    pub addresses: Vec<String>,
}

/// The hosting application's entry point, executed inside the worker
/// once listeners are bound. Connection draining on shutdown is the
/// program's responsibility; the supervisor only closes processes.
pub type Program = Box<dyn FnOnce(ProgramState) -> BoxFuture<'static, Result<()>> + Send>;

/// Internal worker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Initializing,
    Tasking,
    Destroyed,
}

/// Worker-side half of the supervisor.
#[derive(Debug)]
pub(crate) struct Worker {
    state: WorkerState,
    listeners: Option<Vec<TcpListener>>,
    addresses: Vec<String>,
}

impl Worker {
    /// Verify binary integrity and parentage, then bind every configured
    /// address. Any failure is fatal to the worker process: nothing is
    /// bound unless every precondition holds.
    pub(crate) async fn initial(addresses: Vec<String>) -> Result<Self> {
        verify_binary_hash().await?;

        if !platform::parent_alive() {
            return Err(OverseerError::Orphaned.into());
        }

        let listeners = bind_addresses(&addresses).await?;
        info!(count = listeners.len(), "worker listeners bound");

        Ok(Self {
            state: WorkerState::Initializing,
            listeners: Some(listeners),
            addresses,
        })
    }

    /// Hand the listeners to the program and run it to completion. The
    /// program call is synchronous ownership: when it returns, the
    /// worker is done.
    pub(crate) async fn run(mut self, program: Program) -> Result<()> {
        if self.state != WorkerState::Initializing {
            anyhow::bail!("worker is {:?}, cannot run program", self.state);
        }
        let listeners = self
            .listeners
            .take()
            .context("worker has no listeners: already run or destroyed")?;
        self.state = WorkerState::Tasking;
        debug!("worker entering program");

        let result = program(ProgramState {
            listeners,
            addresses: self.addresses.clone(),
        })
        .await;

        self.state = WorkerState::Destroyed;
        result
    }

    /// Close all listeners still held by the worker. Listeners already
    /// handed to the program are owned by it; in-flight connections are
    /// the program's to drain.
    pub(crate) fn destroy(&mut self) {
        if self.listeners.take().is_some() {
            debug!("worker listeners closed");
        }
        self.state = WorkerState::Destroyed;
    }
}

/// Bind every address, failing on the first one that cannot be bound.
pub(crate) async fn bind_addresses(addresses: &[String]) -> Result<Vec<TcpListener>> {
    let mut listeners = Vec::with_capacity(addresses.len());
    for address in addresses {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("failed to bind {address}"))?;
        debug!(address = %listener.local_addr()?, "bound listener");
        listeners.push(listener);
    }
    Ok(listeners)
}

/// Compare this binary's content hash against the short hash the manager
/// embedded at spawn time. Not a security boundary - the hash is visible
/// in the environment - but it catches launch/binary mismatches before
/// any socket is bound.
async fn verify_binary_hash() -> Result<()> {
    let expected = std::env::var(ENV_SHORT_BIN_HASH)
        .context("worker launched without a binary hash marker")?;

    let exe = std::env::current_exe().context("failed to resolve own executable path")?;
    let full = hash_file(&exe).await?;
    let actual = short_hash(&full);

    if actual != expected {
        return Err(OverseerError::IntegrityMismatch {
            expected,
            actual: actual.to_string(),
        }
        .into());
    }
    debug!(hash = actual, "worker binary verified");
    Ok(())
}
