//! Raw frame capture
//!
//! The capture source produces timestamped raw frames from the browser
//! session. The pipeline only consumes its output; each frame is handed to
//! the relay host exactly once and never retained after the encode attempt.

mod screencast;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{AppError, Result};
use crate::transport::ScreencastParams;

pub use screencast::ScreencastCapture;

/// Capture metadata attached to each raw frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Capture wall-clock time, microseconds since the Unix epoch
    pub capture_timestamp_us: u64,
    pub width: u32,
    pub height: u32,
}

/// A raw captured frame
#[derive(Debug, Clone)]
pub struct FrameEvent {
    /// Decoded image bytes as delivered by the capture source
    pub image_data: Bytes,
    pub metadata: FrameMetadata,
    /// Screencast frame id, already acknowledged by the capture source
    pub ack_id: i64,
}

/// Where captured frames go. Bounded; a full sink drops the frame rather
/// than stalling capture.
pub type FrameSink = mpsc::Sender<FrameEvent>;

/// Where capture-side errors go
pub type ErrorSink = mpsc::Sender<AppError>;

/// External producer of timestamped raw frames
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Bind the frame and error sinks. Replaces any previous subscription.
    async fn subscribe(&self, frames: FrameSink, errors: ErrorSink) -> Result<()>;

    /// Begin producing frames
    async fn start(&self, params: &ScreencastParams) -> Result<()>;

    /// Stop producing frames; the subscription stays bound
    async fn stop(&self) -> Result<()>;

    /// Resize the captured viewport
    async fn set_viewport(&self, width: u32, height: u32) -> Result<()>;
}
