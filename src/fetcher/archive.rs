//! Archive extraction for downloaded release assets.
//!
//! Release artifacts arrive in whatever shape the publisher chose: bare
//! binaries, `.tar.gz` bundles, single-file `.gz` compressions, or
//! `.zip` archives (the Windows convention). The format is inferred from
//! the asset's nested extensions - `.tar.gz` unwraps `.gz` then `.tar` -
//! and everything is extracted into an isolated scratch directory that
//! the caller scans for the actual executable.

use anyhow::{Context, Result, bail};
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extract `archive` into `dest`, inferring the format from `asset_name`.
///
/// Unrecognized extensions are treated as a bare binary and copied
/// through unchanged.
pub(crate) fn extract_asset(archive: &Path, asset_name: &str, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("failed to create extraction dir {}", dest.display()))?;

    let lower = asset_name.to_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        extract_tar_gz(archive, dest)
    } else if lower.ends_with(".tar") {
        extract_tar(File::open(archive)?, dest)
    } else if lower.ends_with(".gz") {
        // Single gzipped file: unwrapping one extension yields the name.
        let inner = asset_name
            .strip_suffix(".gz")
            .unwrap_or(asset_name)
            .to_string();
        extract_gz(archive, &dest.join(file_name_of(&inner)))
    } else if lower.ends_with(".zip") {
        extract_zip(archive, dest)
    } else {
        let target = dest.join(file_name_of(asset_name));
        std::fs::copy(archive, &target)
            .with_context(|| format!("failed to copy bare asset to {}", target.display()))?;
        Ok(())
    }
}

fn file_name_of(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("failed to open archive {}", archive.display()))?;
    let gz = flate2::read::GzDecoder::new(file);
    extract_tar(gz, dest)
}

fn extract_tar(reader: impl std::io::Read, dest: &Path) -> Result<()> {
    let mut tar = tar::Archive::new(reader);
    tar.unpack(dest).context("failed to unpack tar archive")?;
    Ok(())
}

fn extract_gz(archive: &Path, target: &Path) -> Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("failed to open archive {}", archive.display()))?;
    let mut gz = flate2::read::GzDecoder::new(file);
    let mut out = File::create(target)
        .with_context(|| format!("failed to create {}", target.display()))?;
    std::io::copy(&mut gz, &mut out).context("failed to decompress gzip asset")?;
    Ok(())
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("failed to open archive {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file).context("failed to read zip archive")?;
    zip.extract(dest).context("failed to unpack zip archive")?;
    Ok(())
}

/// Scan an extraction directory for the first file matching the binary
/// predicate. Directories and archive leftovers are skipped; entries are
/// visited in sorted order so the result is deterministic.
pub(crate) fn find_binary(dir: &Path, matches: impl Fn(&str) -> bool) -> Option<PathBuf> {
    let mut walker = WalkDir::new(dir).sort_by_file_name().into_iter();
    while let Some(Ok(entry)) = walker.next() {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if matches(&name) {
            return Some(entry.into_path());
        }
    }
    None
}

/// Sanity check before extraction: an empty download is always a feed or
/// network fault, never a valid artifact.
pub(crate) fn ensure_non_empty(path: &Path) -> Result<()> {
    let len = std::fs::metadata(path)
        .with_context(|| format!("failed to stat download {}", path.display()))?
        .len();
    if len == 0 {
        bail!("downloaded asset is empty");
    }
    Ok(())
}
