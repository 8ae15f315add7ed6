#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use scan_progress_rs::error::{CancelError, TransportError};
use scan_progress_rs::{FrameStream, ScanBackend, ScanProgress};
use tokio::sync::{mpsc, watch};

pub type FrameTx = mpsc::UnboundedSender<Result<String, TransportError>>;

/// In-memory backend: frames are pushed by the test through a channel.
pub struct ScriptedBackend {
    streams: Mutex<Vec<mpsc::UnboundedReceiver<Result<String, TransportError>>>>,
    pub fail_handshake: bool,
    pub cancel_status: Option<u16>,
    pub subscribes: AtomicUsize,
    pub cancels: AtomicUsize,
    hang_up: Mutex<Option<FrameTx>>,
}

impl ScriptedBackend {
    /// A backend with one scripted stream, plus the sender feeding it.
    pub fn new() -> (Self, FrameTx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backend = Self {
            streams: Mutex::new(vec![rx]),
            fail_handshake: false,
            cancel_status: None,
            subscribes: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            hang_up: Mutex::new(None),
        };
        (backend, tx)
    }

    /// Queue another stream for a later `subscribe`.
    pub fn push_stream(&self) -> FrameTx {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().insert(0, rx);
        tx
    }

    /// End the stream fed by `tx` as soon as a cancel arrives, before answering it,
    /// the way a server tears down the subscription of a cancelled scan.
    pub fn hang_up_on_cancel(&self, tx: FrameTx) {
        *self.hang_up.lock().unwrap() = Some(tx);
    }
}

#[async_trait]
impl ScanBackend for ScriptedBackend {
    async fn subscribe(&self, _scan_id: &str) -> Result<FrameStream, TransportError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        if self.fail_handshake {
            return Err(TransportError::Status(503));
        }
        let rx = self
            .streams
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| TransportError::Other("no scripted stream left".into()))?;
        let frames = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });
        Ok(Box::pin(frames))
    }

    async fn cancel(&self, _scan_id: &str) -> Result<(), CancelError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        let hung_up = self.hang_up.lock().unwrap().take();
        if let Some(tx) = hung_up {
            drop(tx);
            // Let the session see the end of its stream before the answer lands.
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        match self.cancel_status {
            Some(status) => Err(CancelError::Rejected { status }),
            None => Ok(()),
        }
    }
}

pub fn send_all(tx: &FrameTx, frames: &[&str]) {
    for f in frames {
        tx.send(Ok(f.to_string())).unwrap();
    }
}

/// Wait (bounded) until the observed progress satisfies `pred`.
pub async fn wait_until(
    view: &mut watch::Receiver<ScanProgress>,
    pred: impl FnMut(&ScanProgress) -> bool,
) -> ScanProgress {
    let res = tokio::time::timeout(Duration::from_secs(5), view.wait_for(pred))
        .await
        .expect("timed out waiting for progress");
    res.expect("progress channel closed").clone()
}

pub const SCENARIO: &[&str] = &[
    r#"{"type":"step_init","total_steps":2}"#,
    r#"{"type":"step_start","step_index":1,"step_name":"Recon"}"#,
    r#"{"message":"[SUCCESS] found host"}"#,
    r#"{"type":"step_success","step_index":1}"#,
    r#"{"type":"step_start","step_index":2,"step_name":"Exploit"}"#,
    r#"{"message":"[ERROR] denied"}"#,
    r#"{"type":"step_error","step_index":2}"#,
    r#"{"type":"complete","status":"failed"}"#,
];

pub fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}
