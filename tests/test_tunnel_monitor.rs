//! Tests for the tunnel process monitor
//!
//! Runs the monitor against a stand-in shell script instead of cloudflared,
//! verifying URL publication, readiness ordering, and failure reporting.

use anyhow::{Context, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use dropgate::tunnel::TunnelMonitor;

/// Write an executable script the monitor can spawn in place of cloudflared.
/// The script receives the usual `tunnel --url ...` arguments and ignores
/// them.
fn fake_tunnel(dir: &Path, body: &str) -> Result<PathBuf> {
    let path = dir.join("fake-cloudflared");
    std::fs::write(&path, format!("#!/bin/sh\n{body}"))?;
    let mut perms = std::fs::metadata(&path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms)?;
    Ok(path)
}

#[tokio::test]
async fn test_publishes_url_after_readiness_across_streams() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // URL on stderr, readiness on stdout, with noise in between; cloudflared
    // interleaves its diagnostics across both streams the same way.
    let program = fake_tunnel(
        dir.path(),
        r#"echo "INF https://abc-def.trycloudflare.com" >&2
echo "INF Starting metrics server"
echo "noise"
echo "INF Connected to Cloudflare"
sleep 10
"#,
    )?;

    let cancel = CancellationToken::new();
    let (url_tx, url_rx) = oneshot::channel();
    let monitor = TunnelMonitor::new()?.with_program(program.to_string_lossy());
    let handle = tokio::spawn(monitor.run(18080, cancel.clone(), url_tx));

    let url = tokio::time::timeout(Duration::from_secs(10), url_rx)
        .await
        .context("no URL published")?
        .context("publisher dropped")?;
    assert_eq!(url, "https://abc-def.trycloudflare.com");

    // Shutting down kills the subprocess and the monitor reports a clean
    // exit, not an error.
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .context("monitor did not stop")??
        .context("monitor reported an error on cancellation")?;
    Ok(())
}

#[tokio::test]
async fn test_exit_before_readiness_is_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let program = fake_tunnel(
        dir.path(),
        r#"echo "INF https://abc-def.trycloudflare.com" >&2
echo "ERR failed to connect" >&2
exit 1
"#,
    )?;

    let cancel = CancellationToken::new();
    let (url_tx, url_rx) = oneshot::channel();
    let monitor = TunnelMonitor::new()?.with_program(program.to_string_lossy());
    let result = monitor.run(18080, cancel, url_tx).await;

    assert!(result.is_err(), "exit before readiness must be fatal");
    assert!(url_rx.await.is_err(), "no URL may be published");
    Ok(())
}

#[tokio::test]
async fn test_readiness_without_url_never_publishes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let program = fake_tunnel(
        dir.path(),
        r#"echo "INF Registered tunnel connection connIndex=0"
exit 0
"#,
    )?;

    let cancel = CancellationToken::new();
    let (url_tx, url_rx) = oneshot::channel();
    let monitor = TunnelMonitor::new()?.with_program(program.to_string_lossy());
    let result = monitor.run(18080, cancel, url_tx).await;

    assert!(result.is_err(), "exit without a published URL must be fatal");
    assert!(url_rx.await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_missing_program_is_fatal() -> Result<()> {
    let cancel = CancellationToken::new();
    let (url_tx, _url_rx) = oneshot::channel();
    let monitor = TunnelMonitor::new()?.with_program("/nonexistent/cloudflared");
    let result = monitor.run(18080, cancel, url_tx).await;
    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn test_cancellation_before_url_abandons_publication() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let program = fake_tunnel(dir.path(), "sleep 30\n")?;

    let cancel = CancellationToken::new();
    let (url_tx, url_rx) = oneshot::channel();
    let monitor = TunnelMonitor::new()?.with_program(program.to_string_lossy());
    let handle = tokio::spawn(monitor.run(18080, cancel.clone(), url_tx));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .context("monitor did not stop")??
        .context("cancellation must be a clean shutdown")?;
    assert!(url_rx.await.is_err());
    Ok(())
}
