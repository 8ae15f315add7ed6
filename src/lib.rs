//! Library crate for scan-progress-rs: a live aggregator for multi-step scan event streams.
pub mod backend;
pub mod controller;
pub mod decoder;
pub mod error;
pub mod progress;
pub mod replay;
pub mod server;
pub mod session;
pub mod steps;
pub mod types;

pub use backend::{BackendConfig, FrameStream, HttpBackend, ScanBackend};
pub use controller::ScanProgressController;
pub use progress::ScanProgress;
