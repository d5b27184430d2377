//! Public supervisor status, surfaced to callers and over RPC.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Coarse lifecycle state of the supervisor.
///
/// `Destroyed` is terminal: it is set once and never reverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// Worker is up and the polling loops are idle or checking.
    Running,
    /// A newer binary is being downloaded and verified.
    Upgrading,
    /// The worker is being terminated and respawned.
    Restarting,
    /// The supervisor has shut down; no further transitions.
    Destroyed,
}

impl StatusKind {
    /// Default human-readable text for this state.
    pub fn text(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Upgrading => "upgrading",
            Self::Restarting => "restarting",
            Self::Destroyed => "destroyed",
        }
    }
}

/// Snapshot of the supervisor's state plus free-form detail fields.
///
/// `extra` is an open map; during an upgrade it carries download progress
/// (`bytes_downloaded`, and `version` of the release being fetched).
/// It round-trips through JSON so worker processes can query it over RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    /// Current lifecycle state.
    pub kind: StatusKind,
    /// Human-readable description of the state.
    pub text: String,
    /// Open detail fields, e.g. download progress while `Upgrading`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Status {
    /// A plain status for the given state with its default text.
    pub fn new(kind: StatusKind) -> Self {
        Self {
            kind,
            text: kind.text().to_string(),
            extra: BTreeMap::new(),
        }
    }

    /// Whether this status is the terminal `Destroyed` state.
    pub fn is_destroyed(&self) -> bool {
        self.kind == StatusKind::Destroyed
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new(StatusKind::Running)
    }
}
