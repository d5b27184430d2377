//! Core types shared across the supervisor: typed errors, content
//! hashing, and the process-to-process environment contract.

pub mod error;
pub mod hash;

pub use error::OverseerError;

/// Marks a process as a worker. Set by the manager when spawning.
pub const ENV_IS_WORKER: &str = "OVERSEER_IS_WORKER_PROCESS";

/// Marks a process as a manager. Absence of both markers defaults to
/// manager, so a bare invocation of the hosting binary supervises.
pub const ENV_IS_MANAGER: &str = "OVERSEER_IS_MANAGER_PROCESS";

/// Last 8 hex characters of the binary content hash the manager launched
/// the worker with. The worker fatals on mismatch.
pub const ENV_SHORT_BIN_HASH: &str = "OVERSEER_SHORT_BIN_HASH";

/// True when the named boolean environment marker is set to `"true"`.
pub(crate) fn env_marker(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v == "true")
}
