use serde::{Deserialize, Serialize};

use crate::decoder::ScanEvent;
use crate::types::{LogEntry, Step, StepStatus};

/// What applying an event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Nothing observable changed.
    Ignored,
    /// Step structure or status changed.
    Updated,
    /// A log line was recorded; `step` is the index it was attributed to, if any.
    Logged { entry: LogEntry, step: Option<u32> },
}

/// Ordered steps of one scan plus the session-wide chronological log.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StepTable {
    pub steps: Vec<Step>,
    pub log: Vec<LogEntry>,
    #[serde(skip)]
    initialized: bool,
}

impl StepTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self, index: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.index == index)
    }

    fn step_mut(&mut self, index: u32) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.index == index)
    }

    /// Number of steps that reached `success` or `error`.
    pub fn finished(&self) -> usize {
        self.steps.iter().filter(|s| s.status.is_terminal()).count()
    }

    /// Apply one event with the current attribution cursor, returning the outcome and
    /// the cursor to use for the next event.
    pub fn apply(&mut self, event: &ScanEvent, cursor: Option<u32>) -> (Applied, Option<u32>) {
        match event {
            ScanEvent::StepInit { total_steps } => {
                if self.initialized {
                    tracing::warn!(total_steps, "duplicate step_init ignored");
                    return (Applied::Ignored, cursor);
                }
                self.initialized = true;
                self.steps = (1..=*total_steps).map(Step::pending).collect();
                (Applied::Updated, cursor)
            }
            ScanEvent::StepStart {
                step_index,
                step_name,
            } => {
                let cursor = Some(*step_index);
                let Some(step) = self.step_mut(*step_index) else {
                    tracing::debug!(step_index, "step_start for unknown step");
                    return (Applied::Ignored, cursor);
                };
                if !step.status.can_advance_to(StepStatus::Running) {
                    return (Applied::Ignored, cursor);
                }
                step.name = step_name.clone();
                step.status = StepStatus::Running;
                (Applied::Updated, cursor)
            }
            ScanEvent::StepSuccess { step_index } => {
                (self.finish_step(*step_index, StepStatus::Success), cursor)
            }
            ScanEvent::StepError { step_index } => {
                (self.finish_step(*step_index, StepStatus::Error), cursor)
            }
            ScanEvent::LogLine(entry) => {
                self.log.push(entry.clone());
                let step = cursor.and_then(|idx| {
                    let step = self.step_mut(idx)?;
                    step.logs.push(entry.clone());
                    Some(idx)
                });
                (
                    Applied::Logged {
                        entry: entry.clone(),
                        step,
                    },
                    cursor,
                )
            }
            ScanEvent::Marker { .. } | ScanEvent::Complete { .. } => (Applied::Ignored, cursor),
        }
    }

    fn finish_step(&mut self, index: u32, status: StepStatus) -> Applied {
        match self.step_mut(index) {
            Some(step) if step.status.can_advance_to(status) => {
                step.status = status;
                Applied::Updated
            }
            Some(_) => Applied::Ignored,
            None => {
                tracing::debug!(step_index = index, "terminal event for unknown step");
                Applied::Ignored
            }
        }
    }
}
