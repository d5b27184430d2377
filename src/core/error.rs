//! Error handling for the overseer supervisor.
//!
//! The error system follows two principles:
//! 1. **Strongly-typed errors** ([`OverseerError`]) for the failure modes
//!    callers need to distinguish programmatically
//! 2. **`anyhow` with context** for pipeline plumbing, where the only
//!    consumer is a log line or an RPC error string
//!
//! # Error Categories
//!
//! - **Configuration**: [`OverseerError::Config`] - fatal at `run` entry,
//!   before any process is spawned
//! - **Fetch**: [`OverseerError::Fetch`] - logged by the polling loop,
//!   which continues at the next interval; never fatal
//! - **Integrity**: [`OverseerError::IntegrityMismatch`],
//!   [`OverseerError::BinaryNotExecutable`] - fatal to the affected
//!   process; running an unverified binary is unacceptable
//! - **Replace**: [`OverseerError::Replace`] - the upgrade cycle is
//!   aborted, the old binary remains authoritative, and the next interval
//!   retries from scratch
//! - **RPC**: [`OverseerError::Rpc`] - surfaced synchronously to the
//!   caller of the proxied operation
//!
//! Termination failures are deliberately absent: a worker that ignores its
//! graceful-termination signal is force-killed, and "the old process is
//! gone" is the only postcondition anyone waits on.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for overseer operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OverseerError {
    /// Configuration was rejected before any process was spawned.
    #[error("configuration error: {0}")]
    Config(String),

    /// A fetcher failed to check or download a release.
    #[error("fetcher '{name}' failed: {reason}")]
    Fetch {
        /// Name of the fetcher that failed.
        name: String,
        /// Human-readable failure description.
        reason: String,
    },

    /// The named fetcher is not registered with this overseer.
    #[error("unknown fetcher: '{0}'")]
    UnknownFetcher(String),

    /// The running binary does not match the hash it was launched with.
    ///
    /// Raised by the worker when the `OVERSEER_SHORT_BIN_HASH` environment
    /// marker disagrees with the hash of its own executable, e.g. a stale
    /// binary left behind by a failed replace.
    #[error("binary integrity mismatch: launched as {expected}, found {actual}")]
    IntegrityMismatch {
        /// Short hash the manager embedded at spawn time.
        expected: String,
        /// Short hash of the binary actually running.
        actual: String,
    },

    /// The manager's own binary is missing or not executable.
    #[error("binary at {0} is not an executable file")]
    BinaryNotExecutable(PathBuf),

    /// The worker refused to start because its parent manager is gone.
    #[error("worker is orphaned: parent manager process is not alive")]
    Orphaned,

    /// Replacing the on-disk executable failed; the old binary remains
    /// authoritative.
    #[error("failed to replace executable at {path}")]
    Replace {
        /// Path of the executable that should have been replaced.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// An upgrade is already in flight; manual upgrades are rejected
    /// rather than queued.
    #[error("an upgrade is already in progress")]
    UpgradeInProgress,

    /// The overseer has been destroyed; no further operations are
    /// accepted.
    #[error("overseer has been destroyed")]
    Destroyed,

    /// `run` has not been called yet, or was called for a role that does
    /// not support the requested operation.
    #[error("overseer is not running: {0}")]
    NotRunning(&'static str),

    /// RPC transport or protocol failure between worker and manager.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// I/O error outside any more specific category.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding failure (RPC payloads, release feeds).
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl OverseerError {
    /// Build a [`OverseerError::Fetch`] from any displayable reason.
    pub fn fetch(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Fetch {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}
