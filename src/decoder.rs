//! Decoding of raw stream frames into typed scan events.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::error::DecodeError;
use crate::types::{LogEntry, LogLevel, ScanStatus, STEP_MARKER_PREFIX};

/// Status token the server sends in a `complete` frame when the scan succeeded.
pub const SUCCESS_TOKEN: &str = "completed";

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Complete { final_status: ScanStatus },
    StepInit { total_steps: u32 },
    StepStart { step_index: u32, step_name: String },
    StepSuccess { step_index: u32 },
    StepError { step_index: u32 },
    LogLine(LogEntry),
    /// A `[STEP_...]` control line; carries no log content.
    Marker { message: String },
}

/// Wire shape of a frame. Every field is optional so that validation happens per `type`.
///
/// Metadata that a log line only carries along is read leniently: a value of the wrong
/// type becomes `None` instead of rejecting the line.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    status: Option<String>,
    total_steps: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    step_index: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    step_name: Option<String>,
    message: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    source: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    event_type: Option<String>,
}

fn lenient<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(de)?;
    Ok(serde_json::from_value(value).ok())
}

/// Decode one frame payload.
pub fn decode_frame(raw: &str) -> Result<ScanEvent, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    let frame: RawFrame = serde_json::from_value(value)?;

    let Some(kind) = frame.kind.clone() else {
        return decode_log_line(frame);
    };

    match kind.as_str() {
        "complete" => {
            let final_status = match frame.status.as_deref() {
                Some(SUCCESS_TOKEN) => ScanStatus::Completed,
                _ => ScanStatus::Failed,
            };
            Ok(ScanEvent::Complete { final_status })
        }
        "step_init" => Ok(ScanEvent::StepInit {
            total_steps: require(frame.total_steps, "step_init", "total_steps")?,
        }),
        "step_start" => {
            let step_index = require(frame.step_index, "step_start", "step_index")?;
            let step_name = frame
                .step_name
                .unwrap_or_else(|| format!("Step {step_index}"));
            Ok(ScanEvent::StepStart {
                step_index,
                step_name,
            })
        }
        "step_success" => Ok(ScanEvent::StepSuccess {
            step_index: require(frame.step_index, "step_success", "step_index")?,
        }),
        "step_error" => Ok(ScanEvent::StepError {
            step_index: require(frame.step_index, "step_error", "step_index")?,
        }),
        // Unrecognised tags still carry log content when they have a message.
        _ if frame.message.is_some() => decode_log_line(frame),
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}

fn decode_log_line(frame: RawFrame) -> Result<ScanEvent, DecodeError> {
    let message = frame.message.ok_or(DecodeError::Empty)?;
    if message.starts_with(STEP_MARKER_PREFIX) {
        return Ok(ScanEvent::Marker { message });
    }
    let (level, message) = LogLevel::classify(&message);
    Ok(ScanEvent::LogLine(LogEntry {
        timestamp: frame.timestamp.unwrap_or_default(),
        level,
        message,
        source: frame.source,
        event_type: frame.event_type,
        step_index: frame.step_index,
        step_name: frame.step_name,
    }))
}

fn require<T>(v: Option<T>, kind: &'static str, field: &'static str) -> Result<T, DecodeError> {
    v.ok_or(DecodeError::MissingField { kind, field })
}
