//! Download events and the access-log relay.

use anyhow::Result;
use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Capacity of the bounded event channel. Emission uses `try_send`, so a full
/// channel drops events instead of delaying the download response.
pub const EVENT_BUFFER: usize = 64;

/// How long the relay keeps draining after cancellation. Matches the server's
/// shutdown grace so events from in-flight requests still get logged, while a
/// stalled connection holding a sender cannot keep the relay alive forever.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One client request for the served file. Used for access logging only,
/// never for access control.
#[derive(Debug, Clone)]
pub struct DownloadEvent {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub user_agent: String,
}

impl DownloadEvent {
    /// Build an event from the request metadata. The source prefers an
    /// `X-Forwarded-For` header (first hop), falling back to the connection's
    /// peer address.
    pub fn from_request(peer: SocketAddr, headers: &HeaderMap) -> Self {
        let source = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| peer.ip().to_string());

        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        Self {
            timestamp: Utc::now(),
            source,
            user_agent,
        }
    }
}

/// Drain download events into the access log until the channel closes. After
/// cancellation, keeps draining for at most `DRAIN_TIMEOUT` so requests that
/// were already in flight still get logged.
pub async fn relay_access_log(
    mut rx: mpsc::Receiver<DownloadEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => log_event(&event),
                None => return Ok(()),
            },
            _ = cancel.cancelled() => break,
        }
    }

    let _ = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while let Some(event) = rx.recv().await {
            log_event(&event);
        }
    })
    .await;

    Ok(())
}

fn log_event(event: &DownloadEvent) {
    info!(
        target: "access",
        time = %event.timestamp.to_rfc3339(),
        source = %event.source,
        user_agent = %event.user_agent,
        "download",
    );
}
