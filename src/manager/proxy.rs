//! The manager's handle on a spawned worker process.

use anyhow::{Context, Result};
use std::process::ExitStatus;
use tokio::process::Child;
use tracing::debug;

/// Exclusive handle on the worker subprocess.
///
/// Owned by the manager behind its worker lock; destroyed (dropped) when
/// the subprocess exits or is killed. Nothing else in the crate touches
/// the child directly.
pub(crate) struct WorkerProxy {
    child: Child,
    pid: u32,
}

impl WorkerProxy {
    /// Wrap a freshly spawned child. Fails if the child died before its
    /// pid could be captured.
    pub(crate) fn new(child: Child) -> Result<Self> {
        let pid = child.id().context("worker exited before pid capture")?;
        Ok(Self { child, pid })
    }

    /// OS pid of the worker.
    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// Non-blocking liveness probe: the exit status if the worker has
    /// already terminated.
    pub(crate) fn try_exited(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Wait for the worker to exit.
    pub(crate) async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Force-kill the worker and reap it.
    pub(crate) async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            // Already gone is the expected failure here.
            debug!(pid = self.pid, error = %e, "kill after timeout failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn proxy_tracks_a_real_child() {
        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let mut proxy = WorkerProxy::new(child).unwrap();

        assert!(proxy.pid() > 0);
        assert!(proxy.try_exited().is_none());

        proxy.kill().await;
        let status = proxy.wait().await.unwrap();
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exited_child_reports_status() {
        let child = tokio::process::Command::new("true").spawn().unwrap();
        let mut proxy = WorkerProxy::new(child).unwrap();

        let status = proxy.wait().await.unwrap();
        assert!(status.success());
        assert!(proxy.try_exited().is_some());
    }
}
