//! Decode queue
//!
//! Owns the decoder-instance lifecycle and the per-chunk latency ledger.
//! Chunks are submitted for asynchronous decode; completions land on the
//! pending-frame queue and wake the render scheduler when it is parked.

use parking_lot::Mutex as PlMutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::decoder::{DecoderEvent, DecoderFactory, DecoderState, FrameDecoder};
use super::render::PendingFrames;
use crate::error::{AppError, Result};
use crate::transport::{DecoderConfig, EncodedChunk};
use crate::utils::{unix_micros, LogGate};

/// Per-chunk latency bookkeeping, keyed by chunk timestamp
///
/// An entry exists only between chunk arrival and render; it is removed
/// exactly once, at render time or on terminal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameState {
    pub received_at_us: u64,
    pub decoded_at_us: Option<u64>,
}

/// Session-scoped frame-state map, cleared on close
#[derive(Default)]
pub struct FrameLedger {
    states: PlMutex<HashMap<u64, FrameState>>,
}

impl FrameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, timestamp_us: u64, now_us: u64) {
        self.states.lock().insert(
            timestamp_us,
            FrameState {
                received_at_us: now_us,
                decoded_at_us: None,
            },
        );
    }

    pub fn record_decoded(&self, timestamp_us: u64, now_us: u64) {
        if let Some(state) = self.states.lock().get_mut(&timestamp_us) {
            state.decoded_at_us = Some(now_us);
        }
    }

    /// Remove and return the entry for `timestamp_us`
    pub fn take(&self, timestamp_us: u64) -> Option<FrameState> {
        self.states.lock().remove(&timestamp_us)
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }

    pub fn clear(&self) {
        self.states.lock().clear();
    }
}

/// Viewer-side decode stage
pub struct DecodeQueue {
    factory: Arc<dyn DecoderFactory>,
    decoder: Mutex<Option<Arc<dyn FrameDecoder>>>,
    cached_config: PlMutex<Option<DecoderConfig>>,
    ledger: Arc<FrameLedger>,
    sink: mpsc::UnboundedSender<DecoderEvent>,
    gate: LogGate,
}

impl DecodeQueue {
    /// Build the queue and spawn its completion task
    pub fn new(
        factory: Arc<dyn DecoderFactory>,
        ledger: Arc<FrameLedger>,
        pending: Arc<PendingFrames>,
    ) -> Arc<Self> {
        let (sink, completions) = mpsc::unbounded_channel();
        tokio::spawn(run_completions(completions, ledger.clone(), pending));
        Arc::new(Self {
            factory,
            decoder: Mutex::new(None),
            cached_config: PlMutex::new(None),
            ledger,
            sink,
            gate: LogGate::default(),
        })
    }

    /// Apply a decoder configuration
    ///
    /// Caches the config and (re)configures the instance, creating one if
    /// absent or closed.
    pub async fn on_config(&self, config: DecoderConfig) {
        info!(
            codec = %config.codec,
            width = config.coded_width,
            height = config.coded_height,
            "Decoder configuration received"
        );
        *self.cached_config.lock() = Some(config);

        let mut slot = self.decoder.lock().await;
        if let Err(e) = self.configure_instance(&mut slot).await {
            warn!("Decoder configuration failed: {}", e);
        }
    }

    /// Submit one encoded chunk for asynchronous decode
    pub async fn on_chunk(&self, chunk: EncodedChunk) {
        let timestamp_us = chunk.timestamp_us;
        self.ledger.record_received(timestamp_us, unix_micros());

        let decoder = {
            let mut slot = self.decoder.lock().await;
            let live = slot
                .as_ref()
                .filter(|d| d.state() != DecoderState::Closed)
                .cloned();
            match live {
                Some(decoder) => decoder,
                None => match self.configure_instance(&mut slot).await {
                    Ok(decoder) => decoder,
                    Err(e) => {
                        // Terminal for this chunk; its ledger entry goes too
                        if self.gate.should_log("decoder_unavailable") {
                            warn!("Dropping chunk {}: {}", timestamp_us, e);
                        }
                        self.ledger.take(timestamp_us);
                        return;
                    }
                },
            }
        };

        if let Err(e) = decoder.decode(chunk).await {
            if self.gate.should_log("decode_submit") {
                warn!("Decode submission failed for {}: {}", timestamp_us, e);
            }
            self.ledger.take(timestamp_us);
        }
    }

    /// Create (if needed) and configure the decoder with the cached config
    ///
    /// A chunk arriving before any configuration is a protocol-usage error;
    /// the attempt is made with whatever is cached and fails best-effort.
    async fn configure_instance(
        &self,
        slot: &mut Option<Arc<dyn FrameDecoder>>,
    ) -> Result<Arc<dyn FrameDecoder>> {
        let needs_create = slot
            .as_ref()
            .map(|d| d.state() == DecoderState::Closed)
            .unwrap_or(true);
        if needs_create {
            debug!("Creating decoder instance");
            *slot = Some(self.factory.create(self.sink.clone()));
        }
        let decoder = slot.as_ref().cloned().ok_or_else(|| {
            AppError::Decode("decoder creation yielded nothing".to_string())
        })?;

        let config = self.cached_config.lock().clone();
        match config {
            Some(config) => decoder.configure(&config).await?,
            None => {
                return Err(AppError::Config(
                    "no decoder configuration received yet".to_string(),
                ))
            }
        }
        Ok(decoder)
    }

    /// Shut the decode stage down and clear session-scoped state
    pub async fn close(&self) {
        if let Some(decoder) = self.decoder.lock().await.take() {
            decoder.close().await;
        }
        self.ledger.clear();
    }

    pub fn ledger(&self) -> &Arc<FrameLedger> {
        &self.ledger
    }
}

/// Stamp completions into the ledger and hand frames to the scheduler
///
/// Frames reach the render loop only through the queue-plus-wake mechanism,
/// never by painting from this task.
async fn run_completions(
    mut completions: mpsc::UnboundedReceiver<DecoderEvent>,
    ledger: Arc<FrameLedger>,
    pending: Arc<PendingFrames>,
) {
    let gate = LogGate::default();
    while let Some(event) = completions.recv().await {
        match event {
            DecoderEvent::Frame(frame) => {
                ledger.record_decoded(frame.timestamp_us, unix_micros());
                pending.push(frame);
            }
            DecoderEvent::Error {
                timestamp_us,
                error,
            } => {
                if gate.should_log("decode_error") {
                    warn!("Decoder reported error: {}", error);
                }
                if let Some(timestamp_us) = timestamp_us {
                    ledger.take(timestamp_us);
                }
            }
        }
    }
}
