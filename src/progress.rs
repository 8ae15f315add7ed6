//! The observable state of one watched scan.

use serde::Serialize;

use crate::decoder::ScanEvent;
use crate::steps::{Applied, StepTable};
use crate::types::{LogEntry, ScanStatus, SessionState, Step};

/// Outcome of feeding one event into [`ScanProgress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progressed {
    Ignored,
    Updated,
    Logged(LogEntry),
    /// The scan reached a terminal status through a `complete` frame.
    Completed(ScanStatus),
}

/// Snapshot exposed to observers: overall status, connectivity and the step table.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanProgress {
    pub scan_id: Option<String>,
    pub status: ScanStatus,
    pub connected: bool,
    pub session: SessionState,
    pub table: StepTable,
    /// Attribution cursor: the step receiving subsequent log lines.
    pub current_step: Option<u32>,
    pub dropped_frames: u64,
    pub started_at: Option<String>,
    #[serde(skip)]
    pub(crate) generation: u64,
    /// A remote cancel is awaiting its answer; a lost stream only closes the session.
    #[serde(skip)]
    pub(crate) cancel_in_flight: bool,
    /// The stream dropped while a cancel was in flight.
    #[serde(skip)]
    pub(crate) lost_during_cancel: bool,
}

impl ScanProgress {
    pub fn new(scan_id: impl Into<String>) -> Self {
        Self {
            scan_id: Some(scan_id.into()),
            ..Self::default()
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.table.steps
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.table.log
    }

    pub fn is_closed(&self) -> bool {
        self.session == SessionState::Closed
    }

    /// Fold one event into the snapshot. Nothing is applied once the session is closed.
    pub fn apply(&mut self, event: &ScanEvent) -> Progressed {
        if self.is_closed() {
            return Progressed::Ignored;
        }
        if let ScanEvent::Complete { final_status } = event {
            self.close();
            if self.status.is_terminal() {
                return Progressed::Updated;
            }
            self.status = *final_status;
            return Progressed::Completed(*final_status);
        }

        let (applied, cursor) = self.table.apply(event, self.current_step);
        let moved = cursor != self.current_step;
        self.current_step = cursor;
        match applied {
            Applied::Logged { entry, .. } => Progressed::Logged(entry),
            Applied::Updated => Progressed::Updated,
            Applied::Ignored if moved => Progressed::Updated,
            Applied::Ignored => Progressed::Ignored,
        }
    }

    /// Mark the subscription open after a successful handshake.
    pub(crate) fn open(&mut self) -> bool {
        if self.session != SessionState::Connecting {
            return false;
        }
        self.session = SessionState::Open;
        self.connected = true;
        true
    }

    /// Close the session without touching the scan status.
    pub(crate) fn close(&mut self) -> bool {
        let changed = self.session != SessionState::Closed || self.connected;
        self.session = SessionState::Closed;
        self.connected = false;
        changed
    }

    /// Record a lost subscription: closed, disconnected, and failed if still running.
    ///
    /// While a cancel is in flight the failure is deferred until its answer arrives.
    pub(crate) fn disconnect(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.close();
        if self.cancel_in_flight {
            self.lost_during_cancel = true;
        } else if !self.status.is_terminal() {
            self.status = ScanStatus::Failed;
        }
        true
    }

    /// Note that a remote cancel request is about to be sent.
    pub(crate) fn begin_cancel(&mut self) {
        self.cancel_in_flight = true;
    }

    /// The remote cancel failed: apply a failure deferred by [`Self::disconnect`], if any.
    pub(crate) fn abort_cancel(&mut self) -> bool {
        let lost = std::mem::take(&mut self.lost_during_cancel);
        self.cancel_in_flight = false;
        if lost && !self.status.is_terminal() {
            self.status = ScanStatus::Failed;
            return true;
        }
        false
    }

    /// Mark the scan cancelled; returns whether the status actually changed.
    pub(crate) fn cancel(&mut self) -> bool {
        self.cancel_in_flight = false;
        self.lost_during_cancel = false;
        self.close();
        if self.status.is_terminal() {
            return false;
        }
        self.status = ScanStatus::Cancelled;
        true
    }
}
