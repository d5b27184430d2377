//! Fixed-URL fetcher: polls one artifact URL and treats any content
//! change as an update.
//!
//! Useful for sources with no release feed at all - a CI bucket, an
//! internal file server - where the URL always points at "the latest
//! build". There is no version ordering to consult, so the content hash
//! plays the role of the version: a download whose hash differs from the
//! adopted one is an update, and the version string surfaced in
//! [`AssetInfo`] is a hash prefix.

use super::{AssetInfo, Fetched, Fetcher, UsedCallback};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, RwLock};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Length of the hash prefix used as a synthetic version string.
const VERSION_HASH_LEN: usize = 12;

/// Fetcher that polls a single URL with conditional requests.
pub struct HttpFetcher {
    name: String,
    url: String,
    /// Hash of the artifact currently adopted; advanced by used-callback.
    current_hash: Arc<RwLock<Option<String>>>,
    client: Option<reqwest::Client>,
    etag: Option<String>,
    scratch: Option<TempDir>,
}

impl fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}

impl HttpFetcher {
    /// Create a fetcher polling `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            name: "http".to_string(),
            url: url.into(),
            current_hash: Arc::new(RwLock::new(None)),
            client: None,
            etag: None,
            scratch: None,
        }
    }

    /// Override the fetcher name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn used_callback(&self, new_hash: &str) -> UsedCallback {
        let slot = Arc::clone(&self.current_hash);
        let new_hash = new_hash.to_string();
        Box::new(move || {
            debug!(hash = %new_hash, "artifact adopted, advancing content hash");
            *slot.write().expect("hash lock poisoned") = Some(new_hash);
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn init(&mut self) -> Result<()> {
        if self.client.is_some() {
            bail!("fetcher '{}' initialized twice", self.name);
        }
        if self.url.is_empty() {
            bail!("http fetcher requires a url");
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
        let client = self.client.clone().context("fetch called before init")?;

        let mut request = client.get(&self.url);
        if let Some(etag) = &self.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await.context("failed to request artifact")?;
        if response.status() == StatusCode::NOT_MODIFIED {
            debug!(fetcher = %self.name, "artifact unchanged");
            return Ok(None);
        }
        if !response.status().is_success() {
            bail!("artifact url returned {}", response.status());
        }
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        // The content is the artifact: stream it to a scratch file while
        // hashing, then decide whether it is new.
        let scratch = tempfile::tempdir().context("failed to create download dir")?;
        let path = scratch.path().join("artifact");
        let mut out = tokio::fs::File::create(&path).await?;
        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("failed to read download chunk")?;
            hasher.update(&chunk);
            out.write_all(&chunk)
                .await
                .context("failed to write download chunk")?;
        }
        out.flush().await?;
        self.etag = etag;

        let new_hash = hex::encode(hasher.finalize());
        let adopted = self.current_hash.read().expect("hash lock poisoned").clone();
        if adopted.as_deref() == Some(new_hash.as_str()) {
            debug!(fetcher = %self.name, "artifact content unchanged");
            return Ok(None);
        }

        let info = AssetInfo {
            fetcher: self.name.clone(),
            version: format!("sha256-{}", &new_hash[..VERSION_HASH_LEN]),
            release_notes: String::new(),
            url: self.url.clone(),
            published_at: None,
        };
        let used = self.used_callback(&new_hash);

        if !include_file {
            return Ok(Some(Fetched {
                info,
                reader: None,
                used: Some(used),
            }));
        }

        let reader = tokio::fs::File::open(&path)
            .await
            .context("failed to reopen downloaded artifact")?;
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
