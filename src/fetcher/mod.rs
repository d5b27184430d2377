//! Pluggable release sources.
//!
//! A [`Fetcher`] answers one question on every poll: *is there a release
//! strictly newer than what I am currently tracking, and if so, where are
//! its bytes?* The manager owns the polling cadence and the decision to
//! adopt; fetchers own feed access, version bookkeeping, and artifact
//! retrieval.
//!
//! Three implementations ship with the crate:
//!
//! - [`github::GithubFetcher`] - polls a GitHub-style release feed with
//!   conditional requests and semantic-version ordering
//! - [`http::HttpFetcher`] - polls a single fixed URL; any content change
//!   is an update
//! - [`func::FuncFetcher`] - wraps an async closure, for tests and
//!   bespoke sources
//!
//! # The used-callback contract
//!
//! `fetch` hands back a [`UsedCallback`] alongside the artifact. The
//! fetcher MUST NOT advance its own current-version cursor until that
//! callback fires: the caller invokes it only once the fetched bytes have
//! actually been adopted (hashed, verified different, swapped in). A
//! download that is later rejected - most commonly because its hash
//! matches the running binary - must leave the fetcher ready to offer the
//! same release again.

pub mod archive;
pub mod func;
pub mod github;
pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata describing a discovered release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetInfo {
    /// Name of the fetcher that produced this info.
    pub fetcher: String,
    /// Version string of the release, e.g. `"v1.2.0"`.
    pub version: String,
    /// Release notes / changelog body, possibly empty.
    pub release_notes: String,
    /// Where the artifact (or the release page) lives.
    pub url: String,
    /// When the release was published, if the source reports it.
    pub published_at: Option<DateTime<Utc>>,
}

/// Byte stream for a fetched binary artifact.
pub type AssetReader = Box<dyn tokio::io::AsyncRead + Send + Unpin>;

/// Commits the fetcher's current-version bookkeeping. See the module docs
/// for the adoption contract.
pub type UsedCallback = Box<dyn FnOnce() + Send>;

/// A successful fetch: release metadata, optionally the artifact bytes,
/// and the bookkeeping callback.
///
/// `reader: None` means the release exists but no platform-matching
/// artifact could be produced - informational only.
pub struct Fetched {
    /// Metadata for the discovered release.
    pub info: AssetInfo,
    /// The binary artifact, when one was located and `include_file` was
    /// requested.
    pub reader: Option<AssetReader>,
    /// Invoked by the caller after the bytes are adopted.
    pub used: Option<UsedCallback>,
}

impl Fetched {
    /// A metadata-only result with no artifact and no bookkeeping.
    pub fn info_only(info: AssetInfo) -> Self {
        Self {
            info,
            reader: None,
            used: None,
        }
    }
}

/// A pluggable source of release metadata and binary artifacts.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Validate required fields and install defaults. Must be called
    /// exactly once, before the first [`fetch`](Self::fetch); the
    /// supervisor does this for every configured fetcher at startup.
    fn init(&mut self) -> anyhow::Result<()>;

    /// Check the source for a release strictly newer than the fetcher's
    /// current version.
    ///
    /// Returns `Ok(None)` when there is nothing new: the feed is
    /// unchanged (conditional-request hit), the remote version is not
    /// strictly greater, or either version fails to parse. Malformed
    /// version tags are common in the wild and must not halt polling,
    /// so they count as "no update", never as an error.
    ///
    /// With `include_file`, the artifact for the current platform is
    /// downloaded and returned as a reader; without it only metadata is
    /// produced.
    async fn fetch(&mut self, include_file: bool) -> anyhow::Result<Option<Fetched>>;

    /// Unique name of this fetcher, used for RPC-triggered upgrades and
    /// log attribution.
    fn name(&self) -> &str;
}

/// Strict semantic-version comparison used by every version-ordered
/// fetcher: `true` only when both strings parse (after stripping a
/// leading `v`) and `remote` is strictly greater than `current`.
pub(crate) fn is_newer_version(current: &str, remote: &str) -> bool {
    let parse = |v: &str| semver::Version::parse(v.trim().trim_start_matches('v'));
    match (parse(current), parse(remote)) {
        (Ok(current), Ok(remote)) => remote > current,
        _ => false,
    }
}

/// Architecture name aliases seen in release asset names, normalized so
/// `x86_64` builds match `amd64`-named assets and vice versa.
pub(crate) fn arch_aliases(arch: &str) -> &'static [&'static str] {
    match arch {
        "x86_64" | "amd64" => &["x86_64", "amd64", "x64"],
        "aarch64" | "arm64" => &["aarch64", "arm64"],
        "x86" | "i686" => &["i686", "x86", "386"],
        _ => &[],
    }
}

/// OS name aliases seen in release asset names.
pub(crate) fn os_aliases(os: &str) -> &'static [&'static str] {
    match os {
        "macos" => &["darwin", "macos", "apple"],
        "linux" => &["linux"],
        "windows" => &["windows", "win64", "win32"],
        _ => &[],
    }
}

/// Default asset predicate: the name mentions both the current OS and the
/// current architecture under any of their aliases.
pub(crate) fn default_asset_filter(name: &str) -> bool {
    let name = name.to_lowercase();
    let os_ok = os_aliases(std::env::consts::OS)
        .iter()
        .any(|t| name.contains(t));
    let arch_ok = arch_aliases(std::env::consts::ARCH)
        .iter()
        .any(|t| name.contains(t));
    os_ok && arch_ok
}

/// Default binary predicate: platform-appropriate executable naming.
/// Windows binaries end in `.exe`; elsewhere an executable has no
/// extension at all.
pub(crate) fn default_binary_filter(name: &str) -> bool {
    if cfg!(windows) {
        name.to_lowercase().ends_with(".exe")
    } else {
        !name.contains('.')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_version_requires_strict_ordering() {
        assert!(is_newer_version("v1.0.0", "v1.2.0"));
        assert!(is_newer_version("1.0.0", "v1.0.1"));
        assert!(is_newer_version("0.9.9", "1.0.0"));
        assert!(!is_newer_version("1.2.0", "1.2.0"));
        assert!(!is_newer_version("1.3.0", "1.2.9"));
    }

    #[test]
    fn invalid_versions_never_trigger_updates() {
        assert!(!is_newer_version("not-a-version", "v1.0.0"));
        assert!(!is_newer_version("v1.0.0", "nightly"));
        assert!(!is_newer_version("", ""));
        assert!(!is_newer_version("v1", "v2"));
    }

    #[test]
    fn prerelease_ordering_follows_semver() {
        assert!(is_newer_version("1.0.0-beta.1", "1.0.0"));
        assert!(!is_newer_version("1.0.0", "1.0.0-beta.1"));
    }

    #[test]
    fn arch_normalization_covers_amd64() {
        assert!(arch_aliases("x86_64").contains(&"amd64"));
        assert!(arch_aliases("amd64").contains(&"x86_64"));
        assert!(arch_aliases("aarch64").contains(&"arm64"));
        assert!(arch_aliases("riscv64").is_empty());
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    #[test]
    fn default_asset_filter_matches_amd64_naming() {
        assert!(default_asset_filter("app-v1.2.0-linux-amd64.tar.gz"));
        assert!(default_asset_filter("app_linux_x86_64.tar.gz"));
        assert!(!default_asset_filter("app-v1.2.0-darwin-amd64.tar.gz"));
        assert!(!default_asset_filter("app-v1.2.0-linux-arm64.tar.gz"));
    }

    #[cfg(unix)]
    #[test]
    fn default_binary_filter_wants_extensionless_files() {
        assert!(default_binary_filter("app"));
        assert!(!default_binary_filter("app.tar.gz"));
        assert!(!default_binary_filter("README.md"));
    }
}
