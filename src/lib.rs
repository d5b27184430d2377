//! Overseer - a self-upgrading process supervisor.
//!
//! A long-lived **manager** process keeps a **worker** subprocess alive,
//! periodically polls pluggable **fetchers** for newer binary releases,
//! and - when a newer, verified binary is found - atomically replaces the
//! executable on disk and restarts the worker with zero operator
//! intervention.
//!
//! # Architecture Overview
//!
//! Both halves run the same binary; environment markers decide the role:
//!
//! ```text
//! hosting binary (manager role)
//!   ├── spawns itself again as the worker, embedding a short content
//!   │   hash of the binary in the environment
//!   ├── polls each fetcher on an interval (conditional requests,
//!   │   semantic-version ordering)
//!   ├── on a newer release: download → hash → replace → restart worker
//!   └── hosts a loopback RPC server for the worker's API calls
//!
//! hosting binary (worker role)
//!   ├── verifies its own binary against the embedded hash
//!   ├── refuses to start if orphaned
//!   ├── binds the configured listen addresses
//!   └── runs the application's program with those listeners
//! ```
//!
//! # Core Modules
//!
//! - [`overseer`] - the facade: role selection, [`Overseer::run`], and
//!   the public `upgrade`/`status`/`latest_version_info` surface
//! - [`config`] - [`Config`] validation and defaulting
//! - [`fetcher`] - the [`fetcher::Fetcher`] capability and the bundled
//!   release-feed, fixed-URL, and closure-backed implementations
//! - `manager` - worker lifecycle and the upgrade pipeline (internal)
//! - [`worker`] - binary verification, listener binding, and the
//!   [`Program`] contract
//! - `rpc` - the loopback request/reply protocol between the two
//!   processes (internal)
//! - `platform` - per-OS signalling, scratch files, and atomic
//!   executable replacement (internal)
//! - [`core`] - typed errors, content hashing, and the environment
//!   contract
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use overseer::{Config, Overseer};
//! use overseer::fetcher::github::GithubFetcher;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let overseer = Overseer::new(Config {
//!         addresses: vec!["0.0.0.0:8080".into()],
//!         fetchers: vec![Box::new(GithubFetcher::new(
//!             "acme",
//!             "widgetd",
//!             env!("CARGO_PKG_VERSION"),
//!         ))],
//!         ..Config::default()
//!     })?;
//!
//!     let mut handle = overseer
//!         .run(|state| async move {
//!             // bind your server to state.listeners and serve
//!             let _ = state.listeners;
//!             Ok(())
//!         })
//!         .await?;
//!     handle.wait().await
//! }
//! ```
//!
//! # What this crate does not do
//!
//! No package management, no rollback-to-arbitrary-version, and no code
//! signing: fetchers are trusted to serve authentic bytes, and the
//! content hash is only used for idempotence (don't restart onto
//! identical bytes), not provenance.

pub mod config;
pub mod core;
pub mod fetcher;
pub mod overseer;
pub mod status;
pub mod worker;

pub(crate) mod manager;
pub(crate) mod platform;
pub(crate) mod rpc;

pub use config::{Config, NewVersionHook, PreUpgradeHook};
pub use core::OverseerError;
pub use fetcher::{AssetInfo, Fetcher};
pub use overseer::{Overseer, ShutdownHandle};
pub use status::{Status, StatusKind};
pub use worker::{Program, ProgramState};
