//! Windows implementation: console control events and two-step renames.
//!
//! Windows will not let a file that is currently mapped for execution be
//! overwritten, and it has no SIGTERM. Graceful shutdown is a
//! CTRL_BREAK_EVENT scoped to the worker's process group, and replacement
//! renames the running image aside before moving the new one into place.

use std::path::Path;
use tracing::debug;
use windows_sys::Win32::System::Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};
use windows_sys::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP;

/// Suffix given to the displaced running image during replacement.
const OLD_BINARY_SUFFIX: &str = "old";

/// Send a CTRL_BREAK_EVENT to the worker's process group.
///
/// The worker must have been spawned with [`configure_command`] so the
/// event is delivered to its own group and not to the manager's console.
/// `signal_override` is a Unix concern and is ignored here.
pub fn send_graceful_shutdown(pid: u32, _signal_override: Option<i32>) -> std::io::Result<()> {
    debug!(pid, "sending CTRL_BREAK_EVENT to process group");
    // Safety: plain FFI call; a zero return means failure.
    let ok = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) };
    if ok == 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Replace the executable at `dst` with the file at `new`.
///
/// The running image is locked against overwrite but not against rename,
/// so it is moved aside as `<name>.old` first. A stale `.old` from a
/// previous upgrade is removed before the swap.
pub fn replace_executable(new: &Path, dst: &Path) -> std::io::Result<()> {
    let old = dst.with_extension(OLD_BINARY_SUFFIX);
    if old.exists() {
        std::fs::remove_file(&old)?;
    }
    std::fs::rename(dst, &old)?;
    match std::fs::rename(new, dst) {
        Ok(()) => Ok(()),
        Err(e) => {
            // Put the original back so the install is never left headless.
            let _ = std::fs::rename(&old, dst);
            Err(e)
        }
    }
}

/// Spawn the worker in its own process group so console control events
/// addressed to it do not also terminate the manager.
pub fn configure_command(cmd: &mut tokio::process::Command) {
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

/// Whether a process with this pid exists.
///
/// Conservatively returns `false`: the probe only confirms the
/// post-kill state, and kills on this platform are not survivable.
pub fn process_alive(_pid: u32) -> bool {
    false
}

/// Whether this process still has its original parent.
///
/// Windows does not reparent orphans, so there is no cheap authoritative
/// answer; the worker skips the orphan check on this platform.
pub fn parent_alive() -> bool {
    true
}

/// Mirror metadata from the running binary onto its replacement.
/// Executability on Windows comes from the `.exe` extension, so there is
/// nothing to copy.
pub fn mirror_binary_metadata(_src: &Path, _dst: &Path) -> std::io::Result<()> {
    Ok(())
}
