//! Per-OS process and filesystem primitives.
//!
//! Everything the manager and worker need from the operating system is
//! funneled through this module so the supervisor logic stays
//! platform-agnostic: graceful-termination signalling, scratch files for
//! downloaded binaries, atomic executable replacement, and liveness
//! checks. The implementation is selected at compile time.
//!
//! # Platform notes
//!
//! | Capability | Unix | Windows |
//! |---|---|---|
//! | Graceful stop | `SIGTERM` (configurable) | console ctrl event to the child's process group |
//! | Scratch file | generically-named temp file | `.exe`-suffixed temp file (extension required to execute) |
//! | Replace executable | single `rename` (atomic on one filesystem) | rename running image aside as `.old`, then rename new into place |
//! | Spawn flags | none | `CREATE_NEW_PROCESS_GROUP`, so ctrl events skip the manager |

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::*;

use std::path::Path;
use tempfile::NamedTempFile;

/// Create a scratch file for a downloaded binary inside `dir`.
///
/// The file lives in the same directory as the executable it will
/// replace, so the final rename never crosses a filesystem boundary.
pub fn scratch_binary_file(dir: &Path) -> std::io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".overseer-");
    if cfg!(windows) {
        // Windows refuses to execute files without an .exe extension.
        builder.suffix(".exe");
    }
    builder.tempfile_in(dir)
}
