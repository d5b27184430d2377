//! Release-feed fetcher against a mock HTTP server: conditional
//! requests, version gating, asset download and extraction.

use crate::common::tar_gz;
use overseer::fetcher::Fetcher;
use overseer::fetcher::github::GithubFetcher;
use serde_json::json;
use tokio::io::AsyncReadExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RELEASE_PATH: &str = "/repos/acme/app/releases/latest";

fn release_body(server_uri: &str, version: &str) -> serde_json::Value {
    json!({
        "tag_name": version,
        "html_url": format!("https://github.com/acme/app/releases/tag/{version}"),
        "body": "assorted fixes",
        "draft": false,
        "prerelease": false,
        "published_at": "2026-02-01T09:00:00Z",
        "assets": [
            {
                "name": "app-linux-amd64.tar.gz",
                "browser_download_url": format!("{server_uri}/assets/app-linux-amd64.tar.gz"),
                "size": 0
            }
        ]
    })
}

/// A fetcher wired to the mock server, with platform-independent
/// predicates so the suite passes on any OS/arch.
fn fetcher(server: &MockServer, current_version: &str) -> GithubFetcher {
    GithubFetcher::new("acme", "app", current_version)
        .with_api_base(server.uri())
        .with_asset_filter(|name| name.ends_with(".tar.gz"))
        .with_binary_filter(|name| name == "app")
}

async fn mount_release(server: &MockServer, version: &str, etag: Option<&str>) {
    let mut response = ResponseTemplate::new(200).set_body_json(release_body(&server.uri(), version));
    if let Some(etag) = etag {
        response = response.insert_header("etag", etag);
    }
    Mock::given(method("GET"))
        .and(path(RELEASE_PATH))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn mount_asset(server: &MockServer, binary_contents: &[u8]) {
    Mock::given(method("GET"))
        .and(path("/assets/app-linux-amd64.tar.gz"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(tar_gz(&[("app", binary_contents), ("README.md", b"docs")])),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn newer_release_yields_info_and_reader() {
    let server = MockServer::start().await;
    mount_release(&server, "v1.2.0", None).await;
    mount_asset(&server, b"binary-v1.2.0").await;

    let mut fetcher = fetcher(&server, "v1.0.0");
    fetcher.init().unwrap();

    let fetched = fetcher.fetch(true).await.unwrap().expect("update expected");
    assert_eq!(fetched.info.version, "v1.2.0");
    assert_eq!(fetched.info.fetcher, "github");
    assert_eq!(fetched.info.release_notes, "assorted fixes");
    assert!(fetched.info.published_at.is_some());

    let mut reader = fetched.reader.expect("reader expected");
    let mut contents = Vec::new();
    reader.read_to_end(&mut contents).await.unwrap();
    assert_eq!(contents, b"binary-v1.2.0");
}

#[tokio::test]
async fn unchanged_etag_short_circuits_to_none() {
    let server = MockServer::start().await;
    // The conditional request must win over the unconditional response.
    Mock::given(method("GET"))
        .and(path(RELEASE_PATH))
        .and(header("if-none-match", "\"release-etag-1\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;
    mount_release(&server, "v1.2.0", Some("\"release-etag-1\"")).await;
    mount_asset(&server, b"binary-v1.2.0").await;

    let mut fetcher = fetcher(&server, "v1.0.0");
    fetcher.init().unwrap();

    let first = fetcher.fetch(true).await.unwrap();
    assert!(first.is_some(), "first fetch should see the release");

    // Identical call with the cached ETag: not modified, no error.
    let second = fetcher.fetch(true).await.unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn stale_remote_version_is_not_an_update() {
    let server = MockServer::start().await;
    mount_release(&server, "v1.2.0", None).await;

    let mut fetcher = fetcher(&server, "v2.0.0");
    fetcher.init().unwrap();

    assert!(fetcher.fetch(true).await.unwrap().is_none());
    assert_eq!(fetcher.current_version(), "v2.0.0");
}

#[tokio::test]
async fn unparseable_remote_version_is_not_an_update() {
    let server = MockServer::start().await;
    mount_release(&server, "nightly-build", None).await;

    let mut fetcher = fetcher(&server, "v1.0.0");
    fetcher.init().unwrap();

    assert!(fetcher.fetch(true).await.unwrap().is_none());
}

#[tokio::test]
async fn current_version_advances_only_through_used_callback() {
    let server = MockServer::start().await;
    // No ETag in the response: every poll refetches the feed.
    mount_release(&server, "v1.2.0", None).await;
    mount_asset(&server, b"binary-v1.2.0").await;

    let mut fetcher = fetcher(&server, "v1.0.0");
    fetcher.init().unwrap();

    let first = fetcher.fetch(true).await.unwrap().expect("update expected");
    assert_eq!(fetcher.current_version(), "v1.0.0");

    // Not adopted yet: the same release is offered again.
    let second = fetcher.fetch(true).await.unwrap().expect("same release again");
    assert_eq!(second.info.version, first.info.version);

    first.used.expect("used callback expected")();
    assert_eq!(fetcher.current_version(), "v1.2.0");

    // Adopted: the release is no longer an update.
    assert!(fetcher.fetch(true).await.unwrap().is_none());
}

#[tokio::test]
async fn missing_platform_asset_is_informational() {
    let server = MockServer::start().await;
    mount_release(&server, "v1.2.0", None).await;

    let mut fetcher = GithubFetcher::new("acme", "app", "v1.0.0")
        .with_api_base(server.uri())
        .with_asset_filter(|_| false)
        .with_binary_filter(|name| name == "app");
    fetcher.init().unwrap();

    let fetched = fetcher.fetch(true).await.unwrap().expect("info expected");
    assert_eq!(fetched.info.version, "v1.2.0");
    assert!(fetched.reader.is_none());
    assert!(fetched.used.is_none());
}

#[tokio::test]
async fn feed_errors_are_errors_not_silence() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RELEASE_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut fetcher = fetcher(&server, "v1.0.0");
    fetcher.init().unwrap();

    let err = fetcher.fetch(true).await.unwrap_err();
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn download_progress_reports_byte_counts() {
    let server = MockServer::start().await;
    mount_release(&server, "v1.2.0", None).await;
    mount_asset(&server, b"binary-v1.2.0").await;

    let seen = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
    let seen_in_callback = std::sync::Arc::clone(&seen);
    let mut fetcher = GithubFetcher::new("acme", "app", "v1.0.0")
        .with_api_base(server.uri())
        .with_asset_filter(|name| name.ends_with(".tar.gz"))
        .with_binary_filter(|name| name == "app")
        .with_progress(move |downloaded, _total| {
            seen_in_callback.store(downloaded, std::sync::atomic::Ordering::Relaxed);
        });
    fetcher.init().unwrap();

    fetcher.fetch(true).await.unwrap().expect("update expected");
    assert!(seen.load(std::sync::atomic::Ordering::Relaxed) > 0);
}
