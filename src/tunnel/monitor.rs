//! Tunnel subprocess lifecycle and output scanning.

use anyhow::{bail, Context, Result};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::extract::UrlExtractor;

/// How long the subprocess gets to exit after SIGTERM before SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Launches the tunneling subprocess and publishes the public URL once the
/// tunnel is confirmed live.
pub struct TunnelMonitor {
    program: String,
    extractor: UrlExtractor,
}

impl TunnelMonitor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            program: "cloudflared".to_string(),
            extractor: UrlExtractor::new()?,
        })
    }

    /// Use a different executable. Tests point this at a stand-in script.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Replace the readiness patterns, for relay log wording changes.
    pub fn with_ready_patterns(mut self, patterns: &[&str]) -> Result<Self> {
        self.extractor = UrlExtractor::with_ready_patterns(patterns)?;
        Ok(self)
    }

    /// Run the tunnel against the local port until it exits or the token is
    /// cancelled. The public URL is sent on `url_tx` exactly once, and only
    /// after a readiness line followed a URL line in the subprocess output.
    ///
    /// An exit before publication that was not caused by cancellation is a
    /// fatal error. Both output pipes are fully drained before returning.
    pub async fn run(
        self,
        port: u16,
        cancel: CancellationToken,
        url_tx: oneshot::Sender<String>,
    ) -> Result<()> {
        let local_url = format!("http://localhost:{port}");
        info!(target: "tunnel", program = %self.program, url = %local_url, "starting tunnel process");

        let mut child = Command::new(&self.program)
            .args(["tunnel", "--url", &local_url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.program))?;

        let stdout = child.stdout.take().context("capturing tunnel stdout")?;
        let stderr = child.stderr.take().context("capturing tunnel stderr")?;

        let extractor = Arc::new(Mutex::new(self.extractor));
        let publisher = Arc::new(Mutex::new(Some(url_tx)));

        let out_task = spawn_scanner(stdout, extractor.clone(), publisher.clone());
        let err_task = spawn_scanner(stderr, extractor.clone(), publisher.clone());

        let exited = tokio::select! {
            status = child.wait() => Some(status.context("waiting for tunnel process")?),
            _ = cancel.cancelled() => None,
        };
        let status = match exited {
            Some(status) => Some(status),
            None => {
                info!(target: "tunnel", "shutting down tunnel process");
                terminate(&mut child).await?;
                None
            }
        };

        // Join both scanners so the pipes are fully consumed and no task
        // outlives this call. The child is gone, so these finish on EOF.
        let _ = out_task.await;
        let _ = err_task.await;

        let published = publisher.lock().await.is_none();
        match status {
            // Killed by us: clean shutdown.
            None => Ok(()),
            // Exited on its own after the token fired: also clean.
            Some(status) if cancel.is_cancelled() => {
                debug!(target: "tunnel", %status, "tunnel process exited during shutdown");
                Ok(())
            }
            Some(status) if !published => {
                bail!("tunnel process exited before the tunnel was ready: {status}")
            }
            Some(status) if !status.success() => {
                bail!("tunnel process exited unexpectedly: {status}")
            }
            Some(_) => {
                warn!(target: "tunnel", "tunnel process exited cleanly while sharing");
                Ok(())
            }
        }
    }
}

/// SIGTERM the subprocess's whole process group (it was spawned as the group
/// leader, so any helpers it forked come down with it), escalating to SIGKILL
/// after a short grace.
async fn terminate(child: &mut tokio::process::Child) -> Result<()> {
    if let Some(pid) = child.id() {
        let _ = Command::new("kill")
            .args(["-TERM", "--", &format!("-{pid}")])
            .status()
            .await;
    }
    match tokio::time::timeout(TERM_GRACE, child.wait()).await {
        Ok(status) => {
            status.context("reaping tunnel process")?;
        }
        Err(_) => {
            warn!(target: "tunnel", "tunnel process ignored SIGTERM, killing");
            child.kill().await.context("killing tunnel process")?;
        }
    }
    Ok(())
}

/// Scan one output stream line by line, feeding the shared extractor. The
/// first line that completes the state machine takes the one-shot sender and
/// publishes the URL; the mutex plus the extractor's terminal state make a
/// second publication impossible even with both streams matching at once.
fn spawn_scanner<R>(
    stream: R,
    extractor: Arc<Mutex<UrlExtractor>>,
    publisher: Arc<Mutex<Option<oneshot::Sender<String>>>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "tunnel", "{line}");
            let url = extractor.lock().await.observe(&line);
            if let Some(url) = url {
                info!(target: "tunnel", %url, "tunnel ready");
                if let Some(tx) = publisher.lock().await.take() {
                    // The receiver may already be gone if the run was
                    // cancelled first; publication is abandoned in that case.
                    let _ = tx.send(url);
                }
            }
        }
    })
}
