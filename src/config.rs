//! Supervisor configuration and validation.
//!
//! [`Config`] is validated and defaulted once, at [`crate::Overseer::new`],
//! before any process is spawned. Configuration errors are the one class
//! of failure that is always fatal at entry: everything downstream
//! (fetch, replace, terminate) degrades gracefully, but a supervisor with
//! no addresses to bind has nothing to supervise.

use crate::core::OverseerError;
use crate::fetcher::{AssetInfo, Fetcher};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Hook invoked after a new binary has been downloaded and hashed but
/// before the on-disk executable is replaced. Returning an error cancels
/// the upgrade without side effects; the old binary stays authoritative.
pub type PreUpgradeHook = Box<dyn Fn(&AssetInfo) -> anyhow::Result<()> + Send + Sync>;

/// Hook invoked whenever a fetcher reports a release newer than the
/// running version, before any download decision is made.
pub type NewVersionHook = Box<dyn Fn(&AssetInfo) + Send + Sync>;

/// Default loopback TCP port for the manager's RPC server.
pub const DEFAULT_RPC_PORT: u16 = 36180;

/// Default grace period before an unresponsive worker is force-killed.
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between release checks, per fetcher.
pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default deadline for a single fetch-and-download cycle.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Floor applied to `fetch_interval`; polling faster than this hammers
/// release feeds without catching updates any sooner.
pub const MIN_FETCH_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for an [`crate::Overseer`].
///
/// Construct with [`Config::default`], set the fields you care about, and
/// hand it to [`crate::Overseer::new`]. Zero durations are replaced with
/// their defaults during validation; an empty `addresses` list is
/// rejected.
pub struct Config {
    /// Run manager and worker logic in one process, with no subprocess
    /// and no RPC. Upgrades still replace the binary on disk but a
    /// restart is left to the operator.
    pub debug: bool,

    /// Loopback TCP port the manager's RPC server listens on and the
    /// worker's client dials. `0` selects [`DEFAULT_RPC_PORT`].
    pub rpc_port: u16,

    /// Addresses the worker binds before the program runs, e.g.
    /// `"127.0.0.1:8080"`. Must be non-empty.
    pub addresses: Vec<String>,

    /// Grace period between the termination signal and a forced kill.
    pub terminate_timeout: Duration,

    /// Interval between release checks, applied to each fetcher
    /// independently.
    pub fetch_interval: Duration,

    /// Deadline for a single fetch (check plus download) per fetcher.
    pub fetch_timeout: Duration,

    /// Unix signal number sent for graceful worker termination.
    /// Defaults to SIGTERM; ignored on Windows, which uses a console
    /// control event instead.
    pub terminate_signal: Option<i32>,

    /// Invoked before the executable is replaced; an error cancels the
    /// upgrade.
    pub pre_upgrade: Option<PreUpgradeHook>,

    /// Invoked when any fetcher discovers a newer release.
    pub on_new_version: Option<NewVersionHook>,

    /// Release sources, polled independently in registration order.
    /// Names must be unique.
    pub fetchers: Vec<Box<dyn Fetcher>>,

    /// Executable the supervisor manages. `None` (the default) means
    /// the current executable; overriding it lets a launcher supervise
    /// a sibling binary and keeps the upgrade pipeline testable.
    pub binary_path: Option<std::path::PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            rpc_port: DEFAULT_RPC_PORT,
            addresses: Vec::new(),
            terminate_timeout: DEFAULT_TERMINATE_TIMEOUT,
            fetch_interval: DEFAULT_FETCH_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            terminate_signal: None,
            pre_upgrade: None,
            on_new_version: None,
            fetchers: Vec::new(),
            binary_path: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("debug", &self.debug)
            .field("rpc_port", &self.rpc_port)
            .field("addresses", &self.addresses)
            .field("terminate_timeout", &self.terminate_timeout)
            .field("fetch_interval", &self.fetch_interval)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("terminate_signal", &self.terminate_signal)
            .field("pre_upgrade", &self.pre_upgrade.as_ref().map(|_| "<hook>"))
            .field("on_new_version", &self.on_new_version.as_ref().map(|_| "<hook>"))
            .field(
                "fetchers",
                &self.fetchers.iter().map(|f| f.name()).collect::<Vec<_>>(),
            )
            .field("binary_path", &self.binary_path)
            .finish()
    }
}

impl Config {
    /// Validate the configuration and fill defaults in place.
    ///
    /// # Errors
    ///
    /// - `addresses` is empty
    /// - two fetchers share a name
    pub fn validate_and_default(&mut self) -> Result<(), OverseerError> {
        if self.addresses.is_empty() {
            return Err(OverseerError::Config(
                "at least one listen address is required".into(),
            ));
        }

        let mut seen = HashSet::new();
        for fetcher in &self.fetchers {
            if !seen.insert(fetcher.name().to_string()) {
                return Err(OverseerError::Config(format!(
                    "duplicate fetcher name: '{}'",
                    fetcher.name()
                )));
            }
        }

        if self.rpc_port == 0 {
            self.rpc_port = DEFAULT_RPC_PORT;
        }
        if self.terminate_timeout.is_zero() {
            self.terminate_timeout = DEFAULT_TERMINATE_TIMEOUT;
        }
        if self.fetch_interval.is_zero() {
            self.fetch_interval = DEFAULT_FETCH_INTERVAL;
        }
        if self.fetch_interval < MIN_FETCH_INTERVAL {
            self.fetch_interval = MIN_FETCH_INTERVAL;
        }
        if self.fetch_timeout.is_zero() {
            self.fetch_timeout = DEFAULT_FETCH_TIMEOUT;
        }

        Ok(())
    }
}
