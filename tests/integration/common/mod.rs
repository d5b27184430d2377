//! Shared helpers for the integration suite.

#![allow(dead_code)]

use overseer::fetcher::AssetInfo;
use std::path::{Path, PathBuf};

/// Write a fake managed binary with the executable bit set.
#[cfg(unix)]
pub fn fake_binary(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Write an executable shell script to stand in for a worker binary.
#[cfg(unix)]
pub fn fake_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    fake_binary(dir, name, format!("#!/bin/sh\n{body}\n").as_bytes())
}

/// Minimal release metadata for closure fetchers.
pub fn asset_info(fetcher: &str, version: &str) -> AssetInfo {
    AssetInfo {
        fetcher: fetcher.into(),
        version: version.into(),
        release_notes: String::new(),
        url: "mem://test".into(),
        published_at: None,
    }
}

/// Build a `.tar.gz` archive in memory from `(name, contents)` entries.
pub fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut tar = tar::Builder::new(gz);
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        tar.append_data(&mut header, name, *data).unwrap();
    }
    tar.into_inner().unwrap().finish().unwrap()
}
