use std::sync::Arc;

use ::time::{format_description::well_known, OffsetDateTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::ScanBackend;
use crate::error::CancelError;
use crate::progress::ScanProgress;
use crate::session::{Hooks, StreamSession};
use crate::types::{LogEntry, ScanStatus};

struct ActiveSession {
    scan_id: String,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Public facade: watches one scan at a time and exposes its live progress.
///
/// Must be used from within a tokio runtime; `start` spawns the session task.
pub struct ScanProgressController {
    backend: Arc<dyn ScanBackend>,
    hooks: Hooks,
    state: Arc<watch::Sender<ScanProgress>>,
    active: Option<ActiveSession>,
    generation: u64,
}

impl std::fmt::Debug for ScanProgressController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanProgressController")
            .field("scan_id", &self.scan_id())
            .field("generation", &self.generation)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl ScanProgressController {
    pub fn new(backend: Arc<dyn ScanBackend>) -> Self {
        let (tx, _rx) = watch::channel(ScanProgress::default());
        Self {
            backend,
            hooks: Hooks::default(),
            state: Arc::new(tx),
            active: None,
            generation: 0,
        }
    }

    /// Called once with the resolved status when a `complete` frame arrives.
    pub fn on_complete(mut self, f: impl Fn(ScanStatus) + Send + Sync + 'static) -> Self {
        self.hooks.on_complete = Some(Arc::new(f));
        self
    }

    /// Called once when a remote cancel was acknowledged for a running scan.
    pub fn on_cancel(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.on_cancel = Some(Arc::new(f));
        self
    }

    /// Called for every recorded log line, in arrival order.
    pub fn on_log(mut self, f: impl Fn(&LogEntry) + Send + Sync + 'static) -> Self {
        self.hooks.on_log = Some(Arc::new(f));
        self
    }

    /// Begin watching `scan_id`. Returns `false` without doing anything when a live
    /// session for the same id already exists.
    pub fn start(&mut self, scan_id: &str) -> bool {
        if let Some(active) = &self.active {
            if active.scan_id == scan_id && !self.state.borrow().is_closed() {
                tracing::debug!(scan_id, "already watching scan");
                return false;
            }
        }
        self.stop();

        self.generation += 1;
        let mut fresh = ScanProgress::new(scan_id);
        fresh.generation = self.generation;
        fresh.started_at = Some(now_rfc3339());
        self.state.send_replace(fresh);

        let stop = CancellationToken::new();
        let session = StreamSession {
            scan_id: scan_id.to_string(),
            generation: self.generation,
            backend: Arc::clone(&self.backend),
            state: Arc::clone(&self.state),
            hooks: self.hooks.clone(),
            stop: stop.clone(),
        };
        tracing::info!(scan_id, generation = self.generation, "starting scan session");
        let task = tokio::spawn(session.run());
        self.active = Some(ActiveSession {
            scan_id: scan_id.to_string(),
            stop,
            task: Some(task),
        });
        true
    }

    /// Request server-side cancellation, then tear down the local session.
    ///
    /// On failure the error is returned and the scan keeps its status. A stream that
    /// dropped while the request was pending counts as lost only once the request failed.
    pub async fn cancel(&mut self) -> Result<(), CancelError> {
        let Some(active) = &self.active else {
            return Err(CancelError::NoActiveScan);
        };
        let scan_id = active.scan_id.clone();
        let generation = self.generation;

        let pending = PendingCancel::begin(Arc::clone(&self.state), generation);
        if let Err(e) = self.backend.cancel(&scan_id).await {
            tracing::warn!(scan_id = %scan_id, error = %e, "cancel request failed");
            return Err(e);
        }
        pending.resolved();

        let mut cancelled = false;
        self.state.send_if_modified(|p| {
            if p.generation != generation {
                return false;
            }
            let was_open = !p.is_closed();
            cancelled = p.cancel();
            cancelled || was_open
        });
        self.stop();
        tracing::info!(scan_id = %scan_id, cancelled, "scan cancel acknowledged");
        if cancelled {
            if let Some(hook) = &self.hooks.on_cancel {
                hook();
            }
        }
        Ok(())
    }

    /// Close the local subscription immediately without contacting the server. Idempotent.
    pub fn stop(&mut self) {
        let Some(active) = &self.active else {
            return;
        };
        active.stop.cancel();
        let generation = self.generation;
        self.state
            .send_if_modified(|p| p.generation == generation && p.close());
    }

    /// Wait for the current session task to finish.
    pub async fn wait(&mut self) {
        let Some(task) = self.active.as_mut().and_then(|a| a.task.take()) else {
            return;
        };
        if let Err(e) = task.await {
            tracing::error!(error = %e, "scan session task failed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanProgress> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ScanProgress {
        self.state.borrow().clone()
    }

    pub fn scan_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.scan_id.as_str())
    }
}

/// Marks a cancel as in flight; dropping it unresolved (error or abandoned future) aborts it.
struct PendingCancel {
    state: Arc<watch::Sender<ScanProgress>>,
    generation: u64,
    resolved: bool,
}

impl PendingCancel {
    fn begin(state: Arc<watch::Sender<ScanProgress>>, generation: u64) -> Self {
        state.send_if_modified(|p| {
            if p.generation == generation {
                p.begin_cancel();
            }
            false
        });
        Self {
            state,
            generation,
            resolved: false,
        }
    }

    fn resolved(mut self) {
        self.resolved = true;
    }
}

impl Drop for PendingCancel {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        let generation = self.generation;
        self.state
            .send_if_modified(|p| p.generation == generation && p.abort_cancel());
    }
}

impl Drop for ScanProgressController {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.stop.cancel();
        }
    }
}

pub(crate) fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
