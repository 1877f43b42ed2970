//! Encode relay
//!
//! The relay host sits between capture and transport: it feeds raw frames to
//! an encoder living in a sandboxed execution context and forwards the
//! encoded chunks the sandbox emits. Overload is handled by dropping, never
//! queueing.

mod host;
mod sandbox;

use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::transport::{DecoderConfig, EncodedChunk, HostMessage};

pub use host::RelayHost;
pub use sandbox::{CdpSandbox, CdpSandboxFactory, EncoderSandbox, SandboxCallback, SandboxFactory};

/// Encoder instance lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    /// Sandbox loaded, encoder not yet configured
    Uninitialized,
    /// Encoder live at the given dimensions
    Configured { width: u32, height: u32 },
    /// Terminal; no further submits or reconfigures
    Closed,
}

/// Result of one frame submission
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub accepted: bool,
    pub timings: SubmitTimings,
}

/// Caller-side timing of a submission; the encode itself completes
/// asynchronously
#[derive(Debug, Clone, Copy)]
pub struct SubmitTimings {
    pub processing: Duration,
}

/// Relay counters. Drop statistics stay host-local; they are logged, not
/// escalated to the viewer.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub submitted: AtomicU64,
    pub dropped: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub chunks_forwarded: AtomicU64,
    pub reconfigures: AtomicU64,
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    pub submitted: u64,
    pub dropped: u64,
    pub completed: u64,
    pub failed: u64,
    pub chunks_forwarded: u64,
    pub reconfigures: u64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            chunks_forwarded: self.chunks_forwarded.load(Ordering::Relaxed),
            reconfigures: self.reconfigures.load(Ordering::Relaxed),
        }
    }
}

/// Message emitted by the encoder sandbox via its exposed callback
///
/// The sandbox speaks `{type, data}`; on the viewer wire the same payloads
/// travel as `{command, data}`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data")]
enum SandboxMessage {
    #[serde(rename = "configVideoDecoder")]
    Config(DecoderConfig),
    #[serde(rename = "videoChunk")]
    Chunk(EncodedChunk),
}

/// Parse a sandbox callback payload into a host→viewer message
pub fn parse_sandbox_message(payload: Value) -> Result<HostMessage> {
    let msg: SandboxMessage = serde_json::from_value(payload)
        .map_err(|e| AppError::Encode(format!("bad sandbox message: {e}")))?;
    Ok(match msg {
        SandboxMessage::Config(config) => HostMessage::ConfigVideoDecoder(config),
        SandboxMessage::Chunk(chunk) => HostMessage::VideoChunk(chunk),
    })
}
