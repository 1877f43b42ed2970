//! Viewer-side pipeline
//!
//! Receives the host's two message kinds, manages the decoder instance,
//! tracks per-chunk latency, and drains decoded frames onto a display
//! surface as fast as they become available.

mod client;
mod decode_queue;
mod decoder;
mod render;
mod surface;

pub use client::{ViewerClient, ViewerClientConfig};
pub use decode_queue::{DecodeQueue, FrameLedger, FrameState};
pub use decoder::{DecodedFrame, DecoderEvent, DecoderFactory, DecoderSink, DecoderState, FrameDecoder};
pub use render::{PendingFrames, RenderScheduler};
pub use surface::DisplaySurface;
