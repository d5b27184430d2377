//! Manager-side RPC server: accept loop plus one task per connection.

use super::{Method, Reply, Request, Response};
use anyhow::{Context, Result};
use async_trait::async_trait;
use crate::fetcher::AssetInfo;
use crate::status::Status;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// The manager operations reachable over RPC. Implemented by the
/// in-process manager; the indirection keeps the transport testable and
/// the server free of supervisor internals.
#[async_trait]
pub(crate) trait RpcHandler: Send + Sync + 'static {
    /// Trigger an immediate version check on the named fetcher.
    async fn upgrade(&self, fetcher: &str) -> Result<String, String>;
    /// Snapshot the supervisor status.
    async fn status(&self) -> Status;
    /// Newest release any fetcher has reported.
    async fn latest_version_info(&self) -> Option<AssetInfo>;
}

/// Loopback TCP server owned by the manager-side overseer.
pub(crate) struct RpcServer {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl RpcServer {
    /// Bind `127.0.0.1:port` and start accepting worker connections.
    pub(crate) async fn bind(port: u16, handler: Arc<dyn RpcHandler>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("failed to bind rpc server on 127.0.0.1:{port}"))?;
        let local_addr = listener.local_addr()?;
        debug!(%local_addr, "rpc server listening");

        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, handler).await {
                                debug!(%peer, error = %e, "rpc connection ended");
                            }
                        });
                    }
                    Err(e) => {
                        // Accept failures are transient (fd pressure);
                        // the loop itself must never die.
                        error!(error = %e, "rpc accept failed");
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            accept_task,
        })
    }

    /// The bound address, with the ephemeral port resolved.
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections. In-flight requests are dropped; the
    /// worker is being torn down with us.
    pub(crate) fn shutdown(&self) {
        self.accept_task.abort();
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Serve one persistent connection: read a request line, dispatch, write
/// the reply line, repeat until the peer hangs up.
async fn handle_connection(stream: TcpStream, handler: Arc<dyn RpcHandler>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .await
            .context("failed to read rpc request")?;
        if n == 0 {
            return Ok(());
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => Response {
                id: request.id,
                result: dispatch(request.method, handler.as_ref()).await,
            },
            Err(e) => {
                warn!(error = %e, "malformed rpc request");
                Response {
                    id: 0,
                    result: Err(format!("malformed request: {e}")),
                }
            }
        };

        let mut payload = serde_json::to_string(&response)?;
        payload.push('\n');
        writer
            .write_all(payload.as_bytes())
            .await
            .context("failed to write rpc response")?;
    }
}

async fn dispatch(method: Method, handler: &dyn RpcHandler) -> Result<Reply, String> {
    match method {
        Method::Upgrade { fetcher } => handler.upgrade(&fetcher).await.map(Reply::Message),
        Method::Status => Ok(Reply::Status(handler.status().await)),
        Method::LatestVersionInfo => Ok(Reply::LatestVersion(handler.latest_version_info().await)),
    }
}
