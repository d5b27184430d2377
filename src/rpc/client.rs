//! Worker-side RPC client: one persistent loopback connection, lazily
//! dialed so spawn ordering between manager and worker never matters.

use super::{Method, Reply, Request, Response};
use crate::core::OverseerError;
use crate::fetcher::AssetInfo;
use crate::status::Status;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Client for the manager's RPC server.
///
/// Calls are strictly sequential over a single connection (the protocol
/// is call/reply, nothing else), so the connection lives behind one async
/// mutex. A transport failure drops the connection; the next call
/// redials.
pub(crate) struct RpcClient {
    port: u16,
    connection: tokio::sync::Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a client for `127.0.0.1:port`. No connection is made until
    /// the first call.
    pub(crate) fn new(port: u16) -> Self {
        Self {
            port,
            connection: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Trigger an immediate version check on the named fetcher.
    pub(crate) async fn upgrade(&self, fetcher: &str) -> Result<String, OverseerError> {
        match self
            .call(Method::Upgrade {
                fetcher: fetcher.to_string(),
            })
            .await?
        {
            Reply::Message(message) => Ok(message),
            other => Err(unexpected_reply("Message", &other)),
        }
    }

    /// Snapshot the supervisor status.
    pub(crate) async fn status(&self) -> Result<Status, OverseerError> {
        match self.call(Method::Status).await? {
            Reply::Status(status) => Ok(status),
            other => Err(unexpected_reply("Status", &other)),
        }
    }

    /// Newest release any fetcher has reported.
    pub(crate) async fn latest_version_info(&self) -> Result<Option<AssetInfo>, OverseerError> {
        match self.call(Method::LatestVersionInfo).await? {
            Reply::LatestVersion(info) => Ok(info),
            other => Err(unexpected_reply("LatestVersion", &other)),
        }
    }

    async fn call(&self, method: Method) -> Result<Reply, OverseerError> {
        let mut guard = self.connection.lock().await;

        if guard.is_none() {
            let stream = TcpStream::connect(("127.0.0.1", self.port))
                .await
                .map_err(|e| OverseerError::Rpc(format!("failed to reach manager: {e}")))?;
            debug!(port = self.port, "connected to manager rpc server");
            let (reader, writer) = stream.into_split();
            *guard = Some(Connection {
                reader: BufReader::new(reader),
                writer,
            });
        }
        let connection = guard.as_mut().expect("connection just established");

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request { id, method };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let exchange = async {
            connection.writer.write_all(line.as_bytes()).await?;
            let mut reply = String::new();
            let n = connection.reader.read_line(&mut reply).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "manager closed the rpc connection",
                ));
            }
            Ok(reply)
        };

        let reply = match exchange.await {
            Ok(reply) => reply,
            Err(e) => {
                // Poisoned transport: redial on the next call.
                *guard = None;
                return Err(OverseerError::Rpc(e.to_string()));
            }
        };

        let response: Response = serde_json::from_str(&reply)?;
        if response.id != id {
            *guard = None;
            return Err(OverseerError::Rpc(format!(
                "response id {} does not match request id {id}",
                response.id
            )));
        }
        response.result.map_err(OverseerError::Rpc)
    }
}

fn unexpected_reply(wanted: &str, got: &Reply) -> OverseerError {
    OverseerError::Rpc(format!("expected {wanted} reply, got {got:?}"))
}
