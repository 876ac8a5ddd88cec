//! HTTP download server.
//!
//! Serves exactly one file at `/` to any requester, counts downloads, and
//! trips the shared cancellation token once the configured limit is reached.

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::future::IntoFuture;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, error, info, warn};

use crate::events::DownloadEvent;

/// How long in-flight responses get to finish after cancellation before the
/// server is forcibly dropped.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bounds header read and handler time per request. A stalled streaming write
/// past this is bounded by the forced stop at the end of the grace period.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Absolute path of the file being served.
    pub target: PathBuf,
    /// Port to listen on; 0 picks an ephemeral port.
    pub port: u16,
    /// Maximum downloads before shutdown; 0 means unlimited.
    pub limit: u32,
}

struct AppState {
    target: PathBuf,
    filename: String,
    limit: u32,
    downloads: AtomicU32,
    cancel: CancellationToken,
    events: mpsc::Sender<DownloadEvent>,
}

/// Bind, report the listening address on `ready`, and serve downloads until
/// the token is cancelled. Bind failures are returned before `ready` fires.
pub async fn run(
    config: ServerConfig,
    cancel: CancellationToken,
    ready: oneshot::Sender<SocketAddr>,
    events: mpsc::Sender<DownloadEvent>,
) -> Result<()> {
    let filename = config
        .target
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .unwrap_or_else(|| "download".to_string());

    let state = Arc::new(AppState {
        target: config.target,
        filename,
        limit: config.limit,
        downloads: AtomicU32::new(0),
        cancel: cancel.clone(),
        events,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let local_addr = listener.local_addr().context("reading listener address")?;
    info!(target: "server", addr = %local_addr, file = %state.filename, "listening");

    let app = Router::new()
        .route("/", get(download))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state);

    // Listener is bound; the tunnel can point at it now. The receiver may be
    // gone if the run was cancelled during startup, which is fine.
    let _ = ready.send(local_addr);

    let drain = cancel.clone();
    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { drain.cancelled().await })
    .into_future();
    tokio::pin!(serve);

    let finished = tokio::select! {
        res = &mut serve => {
            res.context("serving downloads")?;
            true
        }
        _ = cancel.cancelled() => false,
    };

    // Bounded drain: in-flight responses get the grace period, then the
    // server is dropped with connections still open.
    if !finished {
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut serve).await {
            Ok(res) => res.context("draining connections")?,
            Err(_) => {
                warn!(target: "server", "grace period expired, dropping open connections");
            }
        }
    }

    info!(target: "server", "stopped");
    Ok(())
}

async fn download(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    match tokio::fs::metadata(&state.target).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(target: "server", file = %state.target.display(), "requested file is gone");
            return (StatusCode::NOT_FOUND, "File not found or has been removed.\n")
                .into_response();
        }
        Err(e) => {
            error!(target: "server", error = %e, "stat failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Error accessing file.\n")
                .into_response();
        }
    }

    // Best-effort access logging; a full channel drops the event rather than
    // delaying the response.
    let event = DownloadEvent::from_request(peer, &headers);
    if let Err(e) = state.events.try_send(event) {
        debug!(target: "server", "download event dropped: {e}");
    }

    let file = match tokio::fs::File::open(&state.target).await {
        Ok(file) => file,
        Err(e) => {
            error!(target: "server", error = %e, "opening file failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Error accessing file.\n")
                .into_response();
        }
    };

    // The download counts once the file is open and the streaming body is
    // handed to the HTTP layer, whether or not the client finishes the
    // transfer. The limit is a trigger, not a hard reject: requests already
    // in flight when it trips are drained, not aborted.
    if state.limit > 0 {
        let count = state.downloads.fetch_add(1, Ordering::SeqCst) + 1;
        info!(target: "server", count, limit = state.limit, "download started");
        if count >= state.limit {
            info!(target: "server", "download limit reached, shutting down");
            state.cancel.cancel();
        }
    }

    let body = Body::from_stream(ReaderStream::new(file));
    (
        [
            (
                header::CONTENT_TYPE,
                "application/octet-stream".to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", state.filename),
            ),
        ],
        body,
    )
        .into_response()
}
