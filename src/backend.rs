//! Transport seam: opening the event stream and issuing the remote cancel.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::{future, Stream, StreamExt};
use reqwest::{header, Url};

use crate::error::{CancelError, InvalidBaseUrl, TransportError};

/// Raw frames in delivery order. Ends (or yields an error) when the subscription drops.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

#[async_trait]
pub trait ScanBackend: Send + Sync {
    /// Open the event stream for `scan_id`. Returning `Ok` means the handshake succeeded.
    async fn subscribe(&self, scan_id: &str) -> Result<FrameStream, TransportError>;

    /// Ask the server to abort `scan_id`. Only a 2xx acknowledgement is `Ok`.
    async fn cancel(&self, scan_id: &str) -> Result<(), CancelError>;
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: Url,
    pub connect_timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Scan API over HTTP: `GET {base}/api/scans/{id}/events` (SSE) and `DELETE {base}/api/scans/{id}`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self, TransportError> {
        // No overall request timeout: the event stream stays open for the whole scan.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url,
        })
    }

    /// Build `{base}/api/scans/{scan_id}[/{tail}]`, percent-encoding the id.
    pub fn scan_url(&self, scan_id: &str, tail: Option<&str>) -> Result<Url, InvalidBaseUrl> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InvalidBaseUrl(self.base_url.clone()))?;
            segments.pop_if_empty().extend(["api", "scans", scan_id]);
            if let Some(tail) = tail {
                segments.push(tail);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl ScanBackend for HttpBackend {
    async fn subscribe(&self, scan_id: &str) -> Result<FrameStream, TransportError> {
        let url = self.scan_url(scan_id, Some("events"))?;
        tracing::debug!(%url, "opening event stream");
        let resp = self
            .client
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(sse_frames(resp.bytes_stream()))
    }

    async fn cancel(&self, scan_id: &str) -> Result<(), CancelError> {
        let url = self.scan_url(scan_id, None)?;
        tracing::debug!(%url, "requesting scan cancellation");
        let resp = self.client.delete(url).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(CancelError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

/// Turn a body byte stream into frames, one per SSE event's `data`.
///
/// Keepalive comments and empty events are skipped. A body error surfaces as `Http`.
fn sse_frames<S, B>(body: S) -> FrameStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let frames = body.eventsource().filter_map(|event| {
        future::ready(match event {
            Ok(event) if event.data.is_empty() => None,
            Ok(event) => Some(Ok(event.data)),
            Err(EventStreamError::Transport(e)) => Some(Err(TransportError::Http(e))),
            Err(e) => Some(Err(TransportError::Stream(e))),
        })
    });
    Box::pin(frames)
}
