//! Relay host
//!
//! Accepts raw frames and drives the encoder instance inside the sandbox.
//! Submission is fire-and-forget: a frame arriving while the encoder is
//! still chewing on the previous one is dropped on the spot, bounding both
//! memory and latency. Reconfiguration is idempotent and destructive —
//! identical dimensions are a no-op, new dimensions replace the encoder
//! instance outright.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::{
    parse_sandbox_message, EncoderSandbox, EncoderState, RelayStats, RelayStatsSnapshot,
    SubmitOutcome, SubmitTimings,
};
use crate::capture::FrameEvent;
use crate::error::{AppError, Result};
use crate::transport::HostMessage;
use crate::utils::{LogGate, OnceGuard};

/// Function the sandbox document exposes for raw frame input
const ENCODE_FN: &str = "onFrameData";
/// Function the sandbox document exposes for encoder (re)configuration
const CONFIGURE_FN: &str = "configureEncoder";
/// Binding the sandbox calls with encoded output and decoder configs
const EMIT_BINDING: &str = "emitMessage";

/// Host for one encoder instance inside one sandbox
pub struct RelayHost {
    sandbox: Arc<dyn EncoderSandbox>,
    /// Encoder lifecycle; the lock also serializes reconfiguration against
    /// new submissions
    state: Mutex<EncoderState>,
    /// Set while an encode is in flight; the drop policy in one bit
    busy: Arc<AtomicBool>,
    stats: Arc<RelayStats>,
    gate: Arc<LogGate>,
    closed: OnceGuard,
}

impl RelayHost {
    /// Wire a sandbox up as an encode stage
    ///
    /// Exposes the emit binding, loads the encoder document, and forwards
    /// everything the encoder produces into `output`.
    pub async fn create(
        sandbox: Arc<dyn EncoderSandbox>,
        encoder_url: &str,
        output: mpsc::UnboundedSender<HostMessage>,
    ) -> Result<Arc<Self>> {
        let stats = Arc::new(RelayStats::default());

        let forward_stats = stats.clone();
        sandbox
            .expose_callback(
                EMIT_BINDING,
                Arc::new(move |payload| match parse_sandbox_message(payload) {
                    Ok(msg) => {
                        if matches!(msg, HostMessage::VideoChunk(_)) {
                            forward_stats
                                .chunks_forwarded
                                .fetch_add(1, Ordering::Relaxed);
                        }
                        let _ = output.send(msg);
                    }
                    Err(e) => warn!("Discarding bad encoder output: {}", e),
                }),
            )
            .await?;
        sandbox.navigate(encoder_url).await?;

        info!("Relay host created");
        Ok(Arc::new(Self {
            sandbox,
            state: Mutex::new(EncoderState::Uninitialized),
            busy: Arc::new(AtomicBool::new(false)),
            stats,
            gate: Arc::new(LogGate::default()),
            closed: OnceGuard::new(),
        }))
    }

    /// Submit a raw frame for encoding
    ///
    /// Never blocks beyond its own processing: a busy encoder means the
    /// frame is dropped and `accepted` comes back false. The encode itself
    /// runs detached; its completion only clears the busy flag and updates
    /// the counters.
    pub async fn submit(&self, frame: FrameEvent) -> SubmitOutcome {
        let started = Instant::now();
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        {
            let state = self.state.lock().await;
            if !matches!(*state, EncoderState::Configured { .. }) {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                if self.gate.should_log("unconfigured") {
                    warn!("Dropping frame: encoder not configured");
                }
                return rejected(started);
            }
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            if self.gate.should_log("overload") {
                warn!(
                    dropped = self.stats.dropped.load(Ordering::Relaxed),
                    "Encode pipeline busy, dropping frame"
                );
            }
            return rejected(started);
        }

        let sandbox = self.sandbox.clone();
        let busy = self.busy.clone();
        let stats = self.stats.clone();
        let gate = self.gate.clone();
        tokio::spawn(async move {
            let args = json!({
                "imageData": BASE64.encode(&frame.image_data),
                "metadata": {
                    "timestamp": frame.metadata.capture_timestamp_us,
                    "width": frame.metadata.width,
                    "height": frame.metadata.height,
                },
            });
            let encode_started = Instant::now();
            let res = sandbox.evaluate(ENCODE_FN, args).await;
            busy.store(false, Ordering::Release);
            match res {
                Ok(_) => {
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        elapsed_ms = encode_started.elapsed().as_millis() as u64,
                        timestamp_us = frame.metadata.capture_timestamp_us,
                        "Frame encoded"
                    );
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    if gate.should_log("encode_failed") {
                        warn!("Encode failed: {}", e);
                    }
                }
            }
        });

        SubmitOutcome {
            accepted: true,
            timings: SubmitTimings {
                processing: started.elapsed(),
            },
        }
    }

    /// Reconfigure the encoder for new dimensions
    ///
    /// Identical dimensions are a no-op. Anything else destroys and
    /// recreates the encoder instance inside the sandbox; the state lock is
    /// held across the call so no submission lands mid-replace.
    pub async fn configure(&self, width: u32, height: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        match *state {
            EncoderState::Closed => Err(AppError::Encode(
                "relay host already closed".to_string(),
            )),
            EncoderState::Configured { width: w, height: h } if (w, h) == (width, height) => {
                debug!("Encoder already at {}x{}, skipping reconfigure", width, height);
                Ok(())
            }
            _ => {
                // Holding the state lock keeps new submissions out; an
                // encode already in flight is ordered before this call by
                // the sandbox's single-threaded runtime
                self.sandbox
                    .evaluate(CONFIGURE_FN, json!({ "width": width, "height": height }))
                    .await?;
                *state = EncoderState::Configured { width, height };
                self.stats.reconfigures.fetch_add(1, Ordering::Relaxed);
                info!("Encoder configured at {}x{}", width, height);
                Ok(())
            }
        }
    }

    /// Close the relay host and its sandbox. Idempotent.
    pub async fn close(&self) {
        if !self.closed.enter() {
            return;
        }
        *self.state.lock().await = EncoderState::Closed;
        if let Err(e) = self.sandbox.close().await {
            warn!("Sandbox close failed: {}", e);
        }
        let snapshot = self.stats.snapshot();
        info!(
            submitted = snapshot.submitted,
            dropped = snapshot.dropped,
            completed = snapshot.completed,
            chunks = snapshot.chunks_forwarded,
            "Relay host closed"
        );
    }

    pub async fn state(&self) -> EncoderState {
        *self.state.lock().await
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }
}

fn rejected(started: Instant) -> SubmitOutcome {
    SubmitOutcome {
        accepted: false,
        timings: SubmitTimings {
            processing: started.elapsed(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameMetadata;
    use crate::relay::SandboxCallback;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex as PlMutex;
    use serde_json::Value;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Sandbox whose encode calls park until released
    struct FakeSandbox {
        calls: PlMutex<Vec<(String, Value)>>,
        callbacks: PlMutex<Vec<(String, SandboxCallback)>>,
        release: Notify,
        hold_encodes: AtomicBool,
    }

    impl FakeSandbox {
        fn new(hold_encodes: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: PlMutex::new(Vec::new()),
                callbacks: PlMutex::new(Vec::new()),
                release: Notify::new(),
                hold_encodes: AtomicBool::new(hold_encodes),
            })
        }

        fn calls_named(&self, name: &str) -> usize {
            self.calls.lock().iter().filter(|(n, _)| n == name).count()
        }

        fn emit(&self, payload: Value) {
            let callbacks = self.callbacks.lock();
            for (_, cb) in callbacks.iter() {
                cb(payload.clone());
            }
        }
    }

    #[async_trait]
    impl EncoderSandbox for FakeSandbox {
        async fn evaluate(&self, function: &str, args: Value) -> Result<Value> {
            self.calls.lock().push((function.to_string(), args));
            if function == ENCODE_FN && self.hold_encodes.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            Ok(Value::Bool(true))
        }

        async fn expose_callback(&self, name: &str, handler: SandboxCallback) -> Result<()> {
            self.callbacks.lock().push((name.to_string(), handler));
            Ok(())
        }

        async fn navigate(&self, _url: &str) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn frame(ts: u64) -> FrameEvent {
        FrameEvent {
            image_data: Bytes::from_static(b"raw"),
            metadata: FrameMetadata {
                capture_timestamp_us: ts,
                width: 640,
                height: 480,
            },
            ack_id: 1,
        }
    }

    async fn host(
        sandbox: Arc<FakeSandbox>,
    ) -> (Arc<RelayHost>, mpsc::UnboundedReceiver<HostMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let host = RelayHost::create(sandbox, "http://127.0.0.1/encoder.html", tx)
            .await
            .unwrap();
        (host, rx)
    }

    #[tokio::test]
    async fn test_submit_before_configure_rejected() {
        let sandbox = FakeSandbox::new(false);
        let (host, _rx) = host(sandbox.clone()).await;

        let outcome = host.submit(frame(1)).await;
        assert!(!outcome.accepted);
        assert_eq!(sandbox.calls_named(ENCODE_FN), 0);
    }

    #[tokio::test]
    async fn test_drop_under_overload() {
        let sandbox = FakeSandbox::new(true);
        let (host, _rx) = host(sandbox.clone()).await;
        host.configure(640, 480).await.unwrap();

        // First frame occupies the encoder; the rest must be shed
        let first = host.submit(frame(1)).await;
        assert!(first.accepted);
        tokio::task::yield_now().await;

        let submitted = 5u64;
        for ts in 2..=submitted {
            let outcome = host.submit(frame(ts)).await;
            assert!(!outcome.accepted);
            // Rejection is immediate, not queued behind the encode
            assert!(outcome.timings.processing < Duration::from_millis(100));
        }

        sandbox.release.notify_waiters();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stats = host.stats();
        assert_eq!(stats.submitted, submitted);
        assert_eq!(stats.completed, 1);
        assert!(stats.dropped >= stats.submitted - stats.completed);
    }

    #[tokio::test]
    async fn test_accepts_again_after_completion() {
        let sandbox = FakeSandbox::new(false);
        let (host, _rx) = host(sandbox.clone()).await;
        host.configure(640, 480).await.unwrap();

        assert!(host.submit(frame(1)).await.accepted);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(host.submit(frame(2)).await.accepted);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(host.stats().completed, 2);
    }

    #[tokio::test]
    async fn test_configure_idempotent() {
        let sandbox = FakeSandbox::new(false);
        let (host, _rx) = host(sandbox.clone()).await;

        host.configure(800, 600).await.unwrap();
        host.configure(800, 600).await.unwrap();
        assert_eq!(sandbox.calls_named(CONFIGURE_FN), 1);
        assert_eq!(host.stats().reconfigures, 1);

        host.configure(1024, 768).await.unwrap();
        assert_eq!(sandbox.calls_named(CONFIGURE_FN), 2);
        assert_eq!(
            host.state().await,
            EncoderState::Configured {
                width: 1024,
                height: 768
            }
        );
    }

    #[tokio::test]
    async fn test_chunks_forwarded_from_sandbox() {
        let sandbox = FakeSandbox::new(false);
        let (host, mut rx) = host(sandbox.clone()).await;

        sandbox.emit(json!({
            "type": "configVideoDecoder",
            "data": { "codec": "vp8", "codedWidth": 640, "codedHeight": 480 },
        }));
        sandbox.emit(json!({
            "type": "videoChunk",
            "data": { "timestamp": 1000, "type": "key", "chunkData": "AQID" },
        }));
        sandbox.emit(json!({ "type": "garbage" }));

        assert!(matches!(
            rx.recv().await.unwrap(),
            HostMessage::ConfigVideoDecoder(_)
        ));
        assert!(matches!(rx.recv().await.unwrap(), HostMessage::VideoChunk(_)));
        assert_eq!(host.stats().chunks_forwarded, 1);
    }

    #[tokio::test]
    async fn test_close_is_terminal_and_idempotent() {
        let sandbox = FakeSandbox::new(false);
        let (host, _rx) = host(sandbox.clone()).await;
        host.configure(640, 480).await.unwrap();

        host.close().await;
        host.close().await;
        assert_eq!(host.state().await, EncoderState::Closed);
        assert!(host.configure(640, 480).await.is_err());
        assert!(!host.submit(frame(1)).await.accepted);
    }
}
