//! Frame decoder capability
//!
//! Decoding is delegated to an external capability behind this trait. The
//! decode queue only cares about the three-state lifecycle and the
//! asynchronous completion stream.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{AppError, Result};
use crate::transport::{DecoderConfig, EncodedChunk};

/// Decoder instance lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Created, no configuration applied yet
    Uninitialized,
    /// Ready to accept chunks
    Configured,
    /// Terminal; a new instance must be created
    Closed,
}

/// A decoded frame ready for display
///
/// Dropping the frame releases its underlying resource.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

/// Asynchronous decoder output
#[derive(Debug)]
pub enum DecoderEvent {
    Frame(DecodedFrame),
    Error {
        /// Timestamp of the failed chunk, when the decoder can attribute it
        timestamp_us: Option<u64>,
        error: AppError,
    },
}

/// Where decoder completions go
pub type DecoderSink = mpsc::UnboundedSender<DecoderEvent>;

/// External decode capability
///
/// `decode` submits work; completion arrives later on the sink the instance
/// was created with, in timestamp order for a single instance.
#[async_trait]
pub trait FrameDecoder: Send + Sync {
    fn state(&self) -> DecoderState;

    async fn configure(&self, config: &DecoderConfig) -> Result<()>;

    async fn decode(&self, chunk: EncodedChunk) -> Result<()>;

    async fn close(&self);
}

/// Creates decoder instances bound to a completion sink
pub trait DecoderFactory: Send + Sync {
    fn create(&self, sink: DecoderSink) -> Arc<dyn FrameDecoder>;
}
