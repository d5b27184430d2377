//! Release-feed fetcher for GitHub-style versioned asset feeds.
//!
//! Polls `/repos/{user}/{repo}/releases/latest` with conditional
//! requests: the ETag from the previous response is replayed as
//! `If-None-Match`, and a `304 Not Modified` short-circuits the whole
//! check - "nothing new" is an `Ok(None)`, never an error, so callers can
//! distinguish it from "failed to check". When the feed has moved, the
//! remote tag is compared against the fetcher's current version under
//! strict semantic-version ordering before any download happens.

use super::archive;
use super::{AssetInfo, Fetched, Fetcher, UsedCallback};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ETAG, IF_NONE_MATCH};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Predicate over release-asset names.
pub type AssetFilter = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Progress callback: `(bytes_downloaded, total_bytes_if_known)`.
pub type ProgressFn = Box<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// One release in the feed.
#[derive(Debug, Clone, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    body: Option<String>,
    html_url: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

/// One downloadable artifact attached to a release.
#[derive(Debug, Clone, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: u64,
}

/// Fetcher backed by a GitHub-style release feed.
///
/// # Examples
///
/// ```rust,no_run
/// use overseer::fetcher::github::GithubFetcher;
///
/// let fetcher = GithubFetcher::new("acme", "widgetd", env!("CARGO_PKG_VERSION"));
/// ```
pub struct GithubFetcher {
    name: String,
    user: String,
    repo: String,
    api_base: String,
    /// Shared with issued used-callbacks, which advance it on adoption.
    current_version: Arc<RwLock<String>>,
    asset_filter: AssetFilter,
    binary_filter: AssetFilter,
    on_progress: Option<ProgressFn>,
    client: Option<reqwest::Client>,
    etag: Option<String>,
    /// Extraction directory of the most recent fetch. Held so the open
    /// reader handed to the caller keeps pointing at a live file; the
    /// next fetch (or drop) cleans it up.
    scratch: Option<TempDir>,
}

impl fmt::Debug for GithubFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubFetcher")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("repo", &self.repo)
            .field("api_base", &self.api_base)
            .field("current_version", &self.current_version())
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}

impl GithubFetcher {
    /// Create a fetcher for `{user}/{repo}` tracking `current_version`.
    pub fn new(
        user: impl Into<String>,
        repo: impl Into<String>,
        current_version: impl Into<String>,
    ) -> Self {
        Self {
            name: "github".to_string(),
            user: user.into(),
            repo: repo.into(),
            api_base: "https://api.github.com".to_string(),
            current_version: Arc::new(RwLock::new(current_version.into())),
            asset_filter: Box::new(super::default_asset_filter),
            binary_filter: Box::new(super::default_binary_filter),
            on_progress: None,
            client: None,
            etag: None,
            scratch: None,
        }
    }

    /// Override the fetcher name (required when registering two release
    /// fetchers, since names must be unique).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Point at a different API host, e.g. a GitHub Enterprise install or
    /// a test server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Replace the OS/arch asset-selection predicate.
    pub fn with_asset_filter(
        mut self,
        filter: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.asset_filter = Box::new(filter);
        self
    }

    /// Replace the executable-selection predicate applied to extracted
    /// files.
    pub fn with_binary_filter(
        mut self,
        filter: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.binary_filter = Box::new(filter);
        self
    }

    /// Install a download progress callback.
    pub fn with_progress(mut self, progress: impl Fn(u64, Option<u64>) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(progress));
        self
    }

    /// The version this fetcher currently considers installed.
    pub fn current_version(&self) -> String {
        self.current_version.read().expect("version lock poisoned").clone()
    }

    /// Build the callback that commits `version` as current once the
    /// caller confirms adoption.
    fn used_callback(&self, version: &str) -> UsedCallback {
        let slot = Arc::clone(&self.current_version);
        let version = version.to_string();
        Box::new(move || {
            debug!(version = %version, "release adopted, advancing current version");
            *slot.write().expect("version lock poisoned") = version;
        })
    }

    /// Stream one asset to `path`, reporting progress as chunks land.
    async fn download(
        &self,
        client: &reqwest::Client,
        asset: &ReleaseAsset,
        path: &Path,
    ) -> Result<()> {
        debug!(asset = %asset.name, url = %asset.browser_download_url, "downloading release asset");

        let response = client
            .get(&asset.browser_download_url)
            .send()
            .await
            .context("failed to request release asset")?;
        if !response.status().is_success() {
            bail!("asset download returned {}", response.status());
        }

        let total = response
            .content_length()
            .or(Some(asset.size))
            .filter(|&n| n > 0);

        let mut out = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("failed to read download chunk")?;
            out.write_all(&chunk)
                .await
                .context("failed to write download chunk")?;
            downloaded += chunk.len() as u64;
            if let Some(progress) = &self.on_progress {
                progress(downloaded, total);
            }
        }
        out.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Fetcher for GithubFetcher {
    fn init(&mut self) -> Result<()> {
        if self.client.is_some() {
            bail!("fetcher '{}' initialized twice", self.name);
        }
        if self.user.is_empty() || self.repo.is_empty() {
            bail!("github fetcher requires both user and repo");
        }
        self.client = Some(
            reqwest::Client::builder()
                .user_agent(concat!("overseer/", env!("CARGO_PKG_VERSION")))
                .build()
                .context("failed to build http client")?,
        );
        Ok(())
    }

    async fn fetch(&mut self, include_file: bool) -> Result<Option<Fetched>> {
        let client = self
            .client
            .clone()
            .context("fetch called before init")?;

        let url = format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base, self.user, self.repo
        );
        let mut request = client.get(&url).header(ACCEPT, "application/vnd.github.v3+json");
        if let Some(etag) = &self.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await.context("failed to query release feed")?;
        if response.status() == StatusCode::NOT_MODIFIED {
            debug!(fetcher = %self.name, "release feed unchanged");
            return Ok(None);
        }
        if !response.status().is_success() {
            bail!("release feed returned {}", response.status());
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let release: Release = response
            .json()
            .await
            .context("failed to parse release feed")?;
        self.etag = etag;

        if release.draft {
            return Ok(None);
        }

        let current = self.current_version();
        if !super::is_newer_version(&current, &release.tag_name) {
            debug!(
                fetcher = %self.name,
                current = %current,
                remote = %release.tag_name,
                "no newer release"
            );
            return Ok(None);
        }

        let info = AssetInfo {
            fetcher: self.name.clone(),
            version: release.tag_name.clone(),
            release_notes: release.body.clone().unwrap_or_default(),
            url: release.html_url.clone(),
            published_at: release.published_at,
        };
        let used = self.used_callback(&release.tag_name);

        if !include_file {
            return Ok(Some(Fetched {
                info,
                reader: None,
                used: Some(used),
            }));
        }

        let Some(asset) = release.assets.iter().find(|a| (self.asset_filter)(&a.name)) else {
            warn!(
                fetcher = %self.name,
                version = %release.tag_name,
                "release has no asset for {}-{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            );
            return Ok(Some(Fetched::info_only(info)));
        };

        let scratch = tempfile::tempdir().context("failed to create download dir")?;
        let download_path = scratch.path().join(&asset.name);
        self.download(&client, asset, &download_path).await?;
        archive::ensure_non_empty(&download_path)?;

        let extract_dir = scratch.path().join("extracted");
        archive::extract_asset(&download_path, &asset.name, &extract_dir)?;

        let Some(binary) = archive::find_binary(&extract_dir, |n| (self.binary_filter)(n)) else {
            warn!(
                fetcher = %self.name,
                asset = %asset.name,
                "extracted asset contains no matching binary"
            );
            return Ok(Some(Fetched::info_only(info)));
        };

        let reader = tokio::fs::File::open(&binary)
            .await
            .with_context(|| format!("failed to open extracted binary {}", binary.display()))?;
        // The previous fetch's scratch dir (if any) is dropped here.
        self.scratch = Some(scratch);

        Ok(Some(Fetched {
            info,
            reader: Some(Box::new(reader)),
            used: Some(used),
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_requires_user_and_repo() {
        let mut fetcher = GithubFetcher::new("", "repo", "1.0.0");
        assert!(fetcher.init().is_err());

        let mut fetcher = GithubFetcher::new("user", "", "1.0.0");
        assert!(fetcher.init().is_err());
    }

    #[test]
    fn init_is_single_shot() {
        let mut fetcher = GithubFetcher::new("user", "repo", "1.0.0");
        fetcher.init().unwrap();
        assert!(fetcher.init().is_err());
    }

    #[tokio::test]
    async fn fetch_before_init_is_an_error() {
        let mut fetcher = GithubFetcher::new("user", "repo", "1.0.0");
        assert!(fetcher.fetch(false).await.is_err());
    }

    #[test]
    fn used_callback_advances_version_only_when_invoked() {
        let fetcher = GithubFetcher::new("user", "repo", "v1.0.0");
        let used = fetcher.used_callback("v1.2.0");
        assert_eq!(fetcher.current_version(), "v1.0.0");

        used();
        assert_eq!(fetcher.current_version(), "v1.2.0");
    }

    #[test]
    fn release_feed_parses_github_payload() {
        let payload = serde_json::json!({
            "tag_name": "v1.2.0",
            "html_url": "https://github.com/acme/widgetd/releases/tag/v1.2.0",
            "body": "bug fixes",
            "draft": false,
            "prerelease": false,
            "published_at": "2026-01-15T12:30:00Z",
            "assets": [
                {
                    "name": "widgetd-linux-amd64.tar.gz",
                    "browser_download_url": "https://example.com/widgetd.tar.gz",
                    "size": 1024
                }
            ]
        });
        let release: Release = serde_json::from_value(payload).unwrap();
        assert_eq!(release.tag_name, "v1.2.0");
        assert_eq!(release.assets.len(), 1);
        assert!(release.published_at.is_some());
    }

    #[test]
    fn builder_overrides_apply() {
        let fetcher = GithubFetcher::new("user", "repo", "1.0.0")
            .with_name("mirror")
            .with_api_base("http://localhost:9999");
        assert_eq!(fetcher.name(), "mirror");
        assert_eq!(fetcher.api_base, "http://localhost:9999");
    }
}
