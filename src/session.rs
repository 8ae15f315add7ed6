//! One subscription's lifetime: connect, fold frames in order, close on every exit path.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backend::ScanBackend;
use crate::decoder::decode_frame;
use crate::progress::{Progressed, ScanProgress};
use crate::types::{LogEntry, ScanStatus};

pub type CompleteHook = Arc<dyn Fn(ScanStatus) + Send + Sync>;
pub type CancelHook = Arc<dyn Fn() + Send + Sync>;
pub type LogHook = Arc<dyn Fn(&LogEntry) + Send + Sync>;

/// Callbacks invoked outside of any state borrow.
#[derive(Clone, Default)]
pub struct Hooks {
    pub on_complete: Option<CompleteHook>,
    pub on_cancel: Option<CancelHook>,
    pub on_log: Option<LogHook>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_complete", &self.on_complete.is_some())
            .field("on_cancel", &self.on_cancel.is_some())
            .field("on_log", &self.on_log.is_some())
            .finish()
    }
}

pub(crate) struct StreamSession {
    pub(crate) scan_id: String,
    pub(crate) generation: u64,
    pub(crate) backend: Arc<dyn ScanBackend>,
    pub(crate) state: Arc<watch::Sender<ScanProgress>>,
    pub(crate) hooks: Hooks,
    pub(crate) stop: CancellationToken,
}

impl StreamSession {
    pub(crate) async fn run(self) {
        let connect = tokio::select! {
            biased;
            _ = self.stop.cancelled() => {
                self.update(ScanProgress::close);
                return;
            }
            res = self.backend.subscribe(&self.scan_id) => res,
        };

        let mut frames = match connect {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(scan_id = %self.scan_id, error = %e, "event stream handshake failed");
                self.update(ScanProgress::disconnect);
                return;
            }
        };
        if !self.update(ScanProgress::open) {
            // Stopped between handshake and open.
            return;
        }
        tracing::info!(scan_id = %self.scan_id, "event stream open");

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    tracing::debug!(scan_id = %self.scan_id, "session stopped locally");
                    self.update(ScanProgress::close);
                    break;
                }
                next = frames.next() => match next {
                    Some(Ok(raw)) => {
                        if self.handle_frame(&raw) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(scan_id = %self.scan_id, error = %e, "event stream error");
                        self.update(ScanProgress::disconnect);
                        break;
                    }
                    None => {
                        tracing::warn!(scan_id = %self.scan_id, "event stream ended before completion");
                        self.update(ScanProgress::disconnect);
                        break;
                    }
                },
            }
        }
        // Dropping the stream releases the subscription.
        drop(frames);
    }

    /// Decode and apply one frame; returns `true` once the session is finished.
    fn handle_frame(&self, raw: &str) -> bool {
        let event = match decode_frame(raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(scan_id = %self.scan_id, error = %e, "dropping malformed frame");
                self.update(|p| {
                    p.dropped_frames += 1;
                    true
                });
                return false;
            }
        };

        let mut outcome = Progressed::Ignored;
        let mut closed = false;
        self.state.send_if_modified(|p| {
            if p.generation != self.generation {
                closed = true;
                return false;
            }
            outcome = p.apply(&event);
            closed = p.is_closed();
            outcome != Progressed::Ignored
        });

        match outcome {
            Progressed::Logged(entry) => {
                if let Some(hook) = &self.hooks.on_log {
                    hook(&entry);
                }
            }
            Progressed::Completed(status) => {
                tracing::info!(scan_id = %self.scan_id, ?status, "scan complete");
                if let Some(hook) = &self.hooks.on_complete {
                    hook(status);
                }
            }
            Progressed::Updated | Progressed::Ignored => {}
        }
        closed
    }

    /// Mutate this session's snapshot; a newer session's snapshot is never touched.
    fn update(&self, f: impl FnOnce(&mut ScanProgress) -> bool) -> bool {
        self.state.send_if_modified(|p| p.generation == self.generation && f(p))
    }
}
