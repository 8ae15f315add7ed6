use serde::{Deserialize, Serialize};

/// Message prefix of protocol control lines that must never be recorded as log content.
pub const STEP_MARKER_PREFIX: &str = "[STEP_";

const SUCCESS_MARKER: &str = "[SUCCESS]";
const ERROR_MARKER: &str = "[ERROR]";

/// Severity derived from the marker embedded in a log message.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Error,
    Success,
}

impl LogLevel {
    /// Classify a raw message and return it with the matched marker removed.
    ///
    /// `[SUCCESS]` wins over `[ERROR]` when both are present.
    pub fn classify(message: &str) -> (LogLevel, String) {
        for (marker, level) in [
            (SUCCESS_MARKER, LogLevel::Success),
            (ERROR_MARKER, LogLevel::Error),
        ] {
            if message.contains(marker) {
                let stripped = message.replacen(marker, "", 1);
                return (level, stripped.trim().to_string());
            }
        }
        (LogLevel::Info, message.trim().to_string())
    }
}

/// One line of scan output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Error)
    }

    fn rank(self) -> u8 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::Running => 1,
            StepStatus::Success | StepStatus::Error => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the step moving forward.
    ///
    /// Terminal states accept nothing, including a repeat of themselves.
    pub fn can_advance_to(self, next: StepStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }

    pub fn label(self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Running => "RUNNING",
            StepStatus::Success => "OK",
            StepStatus::Error => "FAIL",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// One phase of the penetration test.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub index: u32,
    pub name: String,
    pub status: StepStatus,
    pub severity: Severity,
    pub logs: Vec<LogEntry>,
}

impl Step {
    pub fn pending(index: u32) -> Self {
        Self {
            index,
            name: format!("Step {index}"),
            status: StepStatus::Pending,
            severity: Severity::default(),
            logs: Vec::new(),
        }
    }
}

/// Overall scan status as seen by the client.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ScanStatus::Running)
    }
}

/// Lifecycle of one subscription to the event stream.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Connecting,
    Open,
    Closed,
}
