//! POSIX implementation: signals via `nix`, rename-based replacement.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::Path;
use tracing::debug;

/// Send the graceful-termination signal to `pid`.
///
/// `signal_override` is a raw signal number from
/// [`crate::config::Config::terminate_signal`]; `None` means SIGTERM.
pub fn send_graceful_shutdown(pid: u32, signal_override: Option<i32>) -> std::io::Result<()> {
    let sig = match signal_override {
        Some(raw) => Signal::try_from(raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?,
        None => Signal::SIGTERM,
    };
    debug!(pid, signal = %sig, "sending graceful shutdown signal");
    signal::kill(Pid::from_raw(pid as i32), sig).map_err(std::io::Error::from)
}

/// Atomically replace the executable at `dst` with the file at `new`.
///
/// A plain rename is atomic as long as both paths are on the same
/// filesystem, which the caller guarantees by creating the scratch file
/// next to the destination.
pub fn replace_executable(new: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::rename(new, dst)
}

/// Configure a command for spawning a worker. No-op on POSIX; signals are
/// addressed to a single pid, so no process-group isolation is needed.
pub fn configure_command(_cmd: &mut tokio::process::Command) {}

/// Whether a process with this pid exists (signal 0 probe).
pub fn process_alive(pid: u32) -> bool {
    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // EPERM means the process exists but belongs to someone else.
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether this process still has its original parent.
///
/// When the parent dies, the process is reparented to init (pid 1), so a
/// ppid of 1 means the manager that spawned us is gone.
pub fn parent_alive() -> bool {
    nix::unistd::getppid().as_raw() > 1
}

/// Mirror mode bits and (best effort) ownership from the running binary
/// onto its freshly downloaded replacement.
pub fn mirror_binary_metadata(src: &Path, dst: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::MetadataExt;

    let meta = std::fs::metadata(src)?;
    std::fs::set_permissions(dst, meta.permissions())?;

    // chown fails without privileges when the manager runs as the binary
    // owner already; that is the common case and not an error.
    if let Err(e) = nix::unistd::chown(
        dst,
        Some(nix::unistd::Uid::from_raw(meta.uid())),
        Some(nix::unistd::Gid::from_raw(meta.gid())),
    ) {
        debug!(error = %e, "could not mirror binary ownership");
    }
    Ok(())
}
