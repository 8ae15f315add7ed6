//! Error types for the aggregator's fallible seams.

use eventsource_stream::EventStreamError;
use reqwest::Url;

/// A frame that could not be turned into a [`crate::decoder::ScanEvent`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("missing field `{field}` in `{kind}` frame")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("unrecognized frame type: {0}")]
    UnknownType(String),

    #[error("frame has neither `type` nor `message`")]
    Empty,
}

/// The configured base URL has no path that scan segments can be appended to.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0} cannot be used as a base URL")]
pub struct InvalidBaseUrl(pub Url);

/// Failure of the event-stream subscription.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("event stream rejected with HTTP {0}")]
    Status(u16),

    #[error("malformed event stream: {0}")]
    Stream(#[source] EventStreamError<reqwest::Error>),

    #[error(transparent)]
    InvalidUrl(#[from] InvalidBaseUrl),

    #[error("{0}")]
    Other(String),
}

/// Failure of a remote cancellation request.
#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("no scan has been started")]
    NoActiveScan,

    #[error("cancel rejected with HTTP {status}")]
    Rejected { status: u16 },

    #[error("cancel request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    InvalidUrl(#[from] InvalidBaseUrl),
}
