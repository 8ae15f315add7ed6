//! Replays a recorded frame file as a scan event stream.
//!
//! Serves the same routes the real scan API exposes, so the aggregator can be
//! exercised end to end without a scanner:
//! - `GET /api/scans/{id}/events`: one SSE event per recorded frame
//! - `DELETE /api/scans/{id}`: acknowledges cancellation and ends the live stream

use std::convert::Infallible;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use axum::{
    extract::{Path as UrlPath, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{delete, get},
    Router,
};
use futures_util::{stream, Stream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Parse JSON-lines frame content into raw frames.
///
/// - one JSON object per line, forwarded verbatim
/// - blank lines and lines starting with `#` are ignored
pub fn parse_frames_str(s: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line)
            .with_context(|| format!("line {line_no}: invalid JSON frame"))?;
        if !value.is_object() {
            bail!("line {line_no}: frame must be a JSON object");
        }
        out.push(line.to_string());
    }
    Ok(out)
}

/// Load recorded frames from a file. Errors if the file cannot be read or parsed.
pub fn load_frames_from_path(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read frames file: {}", path.as_ref().display()))?;
    parse_frames_str(&content)
}

#[derive(Debug, Clone, Default)]
pub struct ReplayConfig {
    pub frames: Vec<String>,
    /// Pause before each frame.
    pub delay: Duration,
    /// Keep the stream open after the last frame until the scan is cancelled.
    pub hold_open: bool,
    /// Answer cancel requests with 500 instead of acknowledging them.
    pub reject_cancel: bool,
}

#[derive(Clone)]
struct ReplayState {
    config: Arc<ReplayConfig>,
    // One token per served stream generation; cancel fires the current one.
    cancel: Arc<Mutex<CancellationToken>>,
}

pub fn router(config: ReplayConfig) -> Router {
    let state = ReplayState {
        config: Arc::new(config),
        cancel: Arc::new(Mutex::new(CancellationToken::new())),
    };
    Router::new()
        .route("/api/scans/{id}/events", get(stream_events))
        .route("/api/scans/{id}", delete(cancel_scan))
        .with_state(state)
}

/// Bind `bind` (port 0 picks a free port) and serve the replay API in the background.
pub async fn spawn_replay_server(bind: &str, config: ReplayConfig) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind replay server on {bind}"))?;
    let addr = listener.local_addr()?;
    let app = router(config);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "replay server error");
        }
    });
    tracing::info!(%addr, "replay server listening");
    Ok(addr)
}

struct Feed {
    config: Arc<ReplayConfig>,
    next: usize,
    cancel: CancellationToken,
}

async fn stream_events(
    State(app): State<ReplayState>,
    UrlPath(scan_id): UrlPath<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let cancel = app.cancel.lock().await.clone();
    tracing::debug!(%scan_id, frames = app.config.frames.len(), "replaying scan");
    let feed = Feed {
        config: app.config.clone(),
        next: 0,
        cancel,
    };
    let events = stream::unfold(feed, |mut feed| async move {
        if feed.cancel.is_cancelled() {
            return None;
        }
        let Some(frame) = feed.config.frames.get(feed.next).cloned() else {
            if feed.config.hold_open {
                feed.cancel.cancelled().await;
            }
            return None;
        };
        tokio::select! {
            _ = feed.cancel.cancelled() => return None,
            _ = tokio::time::sleep(feed.config.delay) => {}
        }
        feed.next += 1;
        Some((Ok(Event::default().data(frame)), feed))
    });
    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

async fn cancel_scan(
    State(app): State<ReplayState>,
    UrlPath(scan_id): UrlPath<String>,
) -> impl IntoResponse {
    if app.config.reject_cancel {
        tracing::debug!(%scan_id, "rejecting cancel");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    let mut current = app.cancel.lock().await;
    current.cancel();
    *current = CancellationToken::new();
    tracing::debug!(%scan_id, "scan cancelled");
    StatusCode::NO_CONTENT
}
