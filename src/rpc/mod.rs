//! Request/reply protocol between worker and manager.
//!
//! The worker process has no direct access to manager state, so its
//! public `upgrade` / `status` / `latest_version_info` calls are proxied
//! over a loopback TCP connection to the manager that spawned it. The
//! protocol is deliberately small: newline-delimited JSON, one request
//! per line, one reply per request, matched by id. No streaming, no
//! cancellation beyond dropping the connection.
//!
//! This layer only exists when manager and worker are separate OS
//! processes; same-process debug mode calls the manager directly.

pub(crate) mod client;
pub(crate) mod server;

use crate::fetcher::AssetInfo;
use crate::status::Status;
use serde::{Deserialize, Serialize};

/// A single request from worker to manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Request {
    /// Client-chosen id echoed back in the matching [`Response`].
    pub id: u64,
    /// The operation to perform.
    pub method: Method,
}

/// Operations the manager exposes over RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub(crate) enum Method {
    /// Trigger an immediate version check on the named fetcher.
    Upgrade {
        /// Name of the fetcher to poll.
        fetcher: String,
    },
    /// Snapshot the supervisor status.
    Status,
    /// The newest release any fetcher has reported.
    LatestVersionInfo,
}

/// Reply to a [`Request`], carrying either data or an error string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Response {
    /// Echo of the request id.
    pub id: u64,
    /// Operation outcome; errors travel as display strings.
    pub result: Result<Reply, String>,
}

/// Successful reply payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub(crate) enum Reply {
    /// Outcome message from an upgrade trigger.
    Message(String),
    /// Status snapshot.
    Status(Status),
    /// Latest known release, if any fetcher has found one.
    LatestVersion(Option<AssetInfo>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusKind;

    #[test]
    fn request_round_trips() {
        let request = Request {
            id: 7,
            method: Method::Upgrade {
                fetcher: "github".into(),
            },
        };
        let line = serde_json::to_string(&request).unwrap();
        let decoded: Request = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded.id, 7);
        assert!(matches!(decoded.method, Method::Upgrade { fetcher } if fetcher == "github"));
    }

    #[test]
    fn parameterless_methods_encode_as_bare_tags() {
        let line = serde_json::to_string(&Request {
            id: 1,
            method: Method::Status,
        })
        .unwrap();
        assert!(line.contains("\"Status\""));
        let decoded: Request = serde_json::from_str(&line).unwrap();
        assert!(matches!(decoded.method, Method::Status));
    }

    #[test]
    fn error_replies_round_trip() {
        let response = Response {
            id: 3,
            result: Err("unknown fetcher: 's3'".into()),
        };
        let line = serde_json::to_string(&response).unwrap();
        let decoded: Response = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded.result.unwrap_err(), "unknown fetcher: 's3'");
    }

    #[test]
    fn status_reply_round_trips() {
        let response = Response {
            id: 4,
            result: Ok(Reply::Status(Status::new(StatusKind::Restarting))),
        };
        let line = serde_json::to_string(&response).unwrap();
        let decoded: Response = serde_json::from_str(&line).unwrap();
        match decoded.result.unwrap() {
            Reply::Status(status) => assert_eq!(status.kind, StatusKind::Restarting),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn latest_version_reply_carries_none() {
        let response = Response {
            id: 5,
            result: Ok(Reply::LatestVersion(None)),
        };
        let line = serde_json::to_string(&response).unwrap();
        let decoded: Response = serde_json::from_str(&line).unwrap();
        assert!(matches!(decoded.result.unwrap(), Reply::LatestVersion(None)));
    }
}
