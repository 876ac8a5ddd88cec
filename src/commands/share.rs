//! The share command: prepare the target, then run the download server, the
//! tunnel monitor, and the access-log relay to coordinated completion.

use anyhow::{bail, Context, Result};
use indicatif::ProgressBar;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive;
use crate::cli::Cli;
use crate::events::{self, DownloadEvent};
use crate::paths;
use crate::server::{self, ServerConfig};
use crate::tunnel::TunnelMonitor;

/// Removes the temporary archive when the share ends, however it ends.
struct ArchiveGuard(PathBuf);

impl Drop for ArchiveGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            warn!(
                "failed to remove temporary archive {}: {}",
                self.0.display(),
                e
            );
        }
    }
}

pub async fn cmd_share(cli: Cli) -> Result<()> {
    let limit = cli.effective_limit();

    let mut sources = Vec::with_capacity(cli.paths.len());
    for raw in &cli.paths {
        let path = paths::expand(raw).with_context(|| format!("failed to expand path {raw:?}"))?;
        match std::fs::metadata(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => bail!("path {raw:?} doesn't exist"),
            Err(e) => return Err(e).with_context(|| format!("checking path {raw:?}")),
        }
        sources.push(path);
    }

    // Holds the archive guard (if one was built) until the run is over.
    let (target, _archive_guard) = prepare_target(&sources, Path::new("."))?;

    let cancel = CancellationToken::new();

    // First SIGINT/SIGTERM starts the graceful shutdown; everything observes
    // the same token.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
            _ = signal_cancel.cancelled() => return,
        }
        signal_cancel.cancel();
    });

    let (ready_tx, ready_rx) = oneshot::channel();
    let (url_tx, url_rx) = oneshot::channel();
    let (event_tx, event_rx) = mpsc::channel::<DownloadEvent>(events::EVENT_BUFFER);

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Preparing your file and establishing a secure tunnel...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    let config = ServerConfig {
        target,
        port: cli.port,
        limit,
    };
    tasks.spawn(server::run(config, cancel.clone(), ready_tx, event_tx));

    tasks.spawn(events::relay_access_log(event_rx, cancel.clone()));

    // The tunnel has to point at a listening port, so its startup waits on
    // the server's readiness notification.
    let monitor = TunnelMonitor::new()?;
    let tunnel_cancel = cancel.clone();
    tasks.spawn(async move {
        let addr = tokio::select! {
            res = ready_rx => match res {
                Ok(addr) => addr,
                // The server died before ever listening; its own error is the
                // one worth reporting.
                Err(_) => return Ok(()),
            },
            _ = tunnel_cancel.cancelled() => return Ok(()),
        };
        monitor.run(addr.port(), tunnel_cancel, url_tx).await
    });

    // Print the public URL when it arrives; print nothing if cancellation
    // wins the race.
    let printer_cancel = cancel.clone();
    let printer_spinner = spinner.clone();
    tasks.spawn(async move {
        tokio::select! {
            url = url_rx => {
                printer_spinner.finish_and_clear();
                if let Ok(url) = url {
                    println!("Your file is ready at: {url}\n");
                    println!("This link is temporary. Press Ctrl+C to stop sharing");
                }
            }
            _ = printer_cancel.cancelled() => {
                printer_spinner.finish_and_clear();
            }
        }
        Ok(())
    });

    // Fail the group on the first fatal error and cancel the rest; errors
    // from tasks unwinding under cancellation are only logged.
    let mut first_err: Option<anyhow::Error> = None;
    while let Some(joined) = tasks.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) => Err(anyhow::Error::from(e).context("task failed")),
        };
        if let Err(e) = result {
            if first_err.is_none() {
                cancel.cancel();
                first_err = Some(e);
            } else {
                debug!("suppressed error during shutdown: {e:#}");
            }
        }
    }
    spinner.finish_and_clear();

    if let Some(e) = first_err {
        return Err(e.context("run failed"));
    }

    println!("All services stopped. Your file is no longer being shared");
    Ok(())
}

/// Resolve the single file to serve. A lone regular file is served as-is;
/// a directory or multiple paths are bundled into a zip under `out_dir`
/// (the working directory in normal runs), with a guard that deletes the
/// archive on every exit path.
fn prepare_target(sources: &[PathBuf], out_dir: &Path) -> Result<(PathBuf, Option<ArchiveGuard>)> {
    if let [source] = sources {
        let meta = std::fs::metadata(source)
            .with_context(|| format!("checking {}", source.display()))?;
        if meta.is_file() {
            return Ok((source.clone(), None));
        }

        let base = source
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("resolving base name of {}", source.display()))?;
        let dest = std::path::absolute(out_dir.join(format!("{base}.zip")))
            .context("resolving archive path")?;
        info!(archive = %dest.display(), "bundling directory into archive");
        archive::zip_directory(source, &dest)?;
        return Ok((dest.clone(), Some(ArchiveGuard(dest))));
    }

    let dest = std::path::absolute(out_dir.join(format!("{}.zip", archive::random_archive_name())))
        .context("resolving archive path")?;
    info!(archive = %dest.display(), count = sources.len(), "bundling paths into archive");
    let count = archive::zip_paths(sources, &dest)?;
    let guard = ArchiveGuard(dest.clone());
    if count == 0 {
        warn!("the archive contains no files");
    }
    Ok((dest, Some(guard)))
}
