//! Render scheduler
//!
//! A cooperative loop with no fixed-rate pacing: frames are painted as fast
//! as they become available. When the pending queue runs dry the loop parks
//! (underflow) until the decode side wakes it with the next append. Live
//! interactive video favors minimum latency over smooth timestamp-paced
//! playback, so nothing is ever held to its original capture cadence.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::decode_queue::FrameLedger;
use super::decoder::DecodedFrame;
use super::surface::DisplaySurface;
use crate::utils::clock::{delta_ms, unix_micros};

/// FIFO of decoded frames awaiting render, plus the wake machinery
///
/// Unbounded in principle, expected shallow because the scheduler drains
/// eagerly.
pub struct PendingFrames {
    queue: Mutex<VecDeque<DecodedFrame>>,
    underflow: AtomicBool,
    wake: Notify,
}

impl PendingFrames {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            // The scheduler starts parked
            underflow: AtomicBool::new(true),
            wake: Notify::new(),
        })
    }

    /// Append a decoded frame. Returns `true` if this append woke an
    /// underflowed scheduler; appends while the scheduler is draining never
    /// wake it again.
    pub fn push(&self, frame: DecodedFrame) -> bool {
        self.queue.lock().push_back(frame);
        if self
            .underflow
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.wake.notify_one();
            true
        } else {
            false
        }
    }

    pub fn pop(&self) -> Option<DecodedFrame> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn is_underflowed(&self) -> bool {
        self.underflow.load(Ordering::Acquire)
    }

    /// Mark underflow, then re-check for a frame that raced in. Returns a
    /// frame if the scheduler should keep draining instead of parking.
    fn park_or_steal(&self) -> Option<DecodedFrame> {
        self.underflow.store(true, Ordering::Release);
        let frame = self.queue.lock().pop_front();
        if frame.is_some() {
            self.underflow.store(false, Ordering::Release);
        }
        frame
    }

    async fn notified(&self) {
        self.wake.notified().await;
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}

/// Greedy render loop over a display surface
pub struct RenderScheduler {
    pending: Arc<PendingFrames>,
    ledger: Arc<FrameLedger>,
    surface: Arc<dyn DisplaySurface>,
    rendered: AtomicU64,
    cancel: CancellationToken,
}

impl RenderScheduler {
    /// Spawn the scheduler task
    pub fn spawn(
        pending: Arc<PendingFrames>,
        ledger: Arc<FrameLedger>,
        surface: Arc<dyn DisplaySurface>,
    ) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            pending,
            ledger,
            surface,
            rendered: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        });
        tokio::spawn(scheduler.clone().run());
        scheduler
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let frame = match self.pending.pop() {
                Some(frame) => frame,
                None => match self.pending.park_or_steal() {
                    Some(frame) => frame,
                    None => {
                        tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            _ = self.pending.notified() => continue,
                        }
                    }
                },
            };
            self.render(frame).await;
        }
        debug!("Render scheduler exiting");
    }

    /// Paint one frame and account for its trip through the pipeline
    async fn render(&self, frame: DecodedFrame) {
        let timestamp_us = frame.timestamp_us;
        if let Err(e) = self.surface.paint(&frame).await {
            warn!("Paint failed for frame {}: {}", timestamp_us, e);
        }
        drop(frame);

        let now = unix_micros();
        if let Some(state) = self.ledger.take(timestamp_us) {
            let decoded = state.decoded_at_us.unwrap_or(state.received_at_us);
            debug!(
                timestamp_us,
                transit_ms = delta_ms(state.received_at_us, timestamp_us),
                decode_ms = delta_ms(decoded, state.received_at_us),
                queue_ms = delta_ms(now, decoded),
                total_ms = delta_ms(now, timestamp_us),
                "Frame rendered"
            );
        }
        self.rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rendered(&self) -> u64 {
        self.rendered.load(Ordering::Relaxed)
    }

    /// Stop the loop. Pending frames are left to the owner to clear.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;

    fn frame(ts: u64) -> DecodedFrame {
        DecodedFrame {
            timestamp_us: ts,
            width: 2,
            height: 2,
            data: Bytes::from_static(b"rgba"),
        }
    }

    struct RecordingSurface {
        painted: Mutex<Vec<u64>>,
        notify: Notify,
    }

    impl RecordingSurface {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                painted: Mutex::new(Vec::new()),
                notify: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl DisplaySurface for RecordingSurface {
        async fn paint(&self, frame: &DecodedFrame) -> Result<()> {
            self.painted.lock().push(frame.timestamp_us);
            self.notify.notify_waiters();
            Ok(())
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_push_wakes_only_on_underflow() {
        let pending = PendingFrames::new();
        assert!(pending.is_underflowed());
        assert!(pending.push(frame(1)));
        // Scheduler not parked anymore: subsequent pushes are silent
        assert!(!pending.push(frame(2)));
        assert!(!pending.push(frame(3)));
        assert_eq!(pending.len(), 3);
    }

    #[tokio::test]
    async fn test_drains_in_fifo_order() {
        let pending = PendingFrames::new();
        let ledger = Arc::new(FrameLedger::new());
        let surface = RecordingSurface::new();
        let scheduler = RenderScheduler::spawn(pending.clone(), ledger, surface.clone());

        for ts in [100u64, 200, 300] {
            pending.push(frame(ts));
        }
        settle().await;

        assert_eq!(*surface.painted.lock(), vec![100, 200, 300]);
        assert_eq!(scheduler.rendered(), 3);
        assert!(pending.is_empty());
        assert!(pending.is_underflowed());
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_underflow_then_single_wake_drains_again() {
        let pending = PendingFrames::new();
        let ledger = Arc::new(FrameLedger::new());
        let surface = RecordingSurface::new();
        let scheduler = RenderScheduler::spawn(pending.clone(), ledger, surface.clone());

        pending.push(frame(1));
        settle().await;
        assert!(pending.is_underflowed());

        // One append after underflow: exactly one wake, drains to empty
        assert!(pending.push(frame(2)));
        settle().await;
        assert_eq!(*surface.painted.lock(), vec![1, 2]);
        assert!(pending.is_underflowed());
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_ledger_entry_consumed_at_render() {
        let pending = PendingFrames::new();
        let ledger = Arc::new(FrameLedger::new());
        ledger.record_received(7, 1_000);
        ledger.record_decoded(7, 2_000);

        let surface = RecordingSurface::new();
        let scheduler = RenderScheduler::spawn(pending.clone(), ledger.clone(), surface);

        pending.push(frame(7));
        settle().await;
        assert_eq!(ledger.len(), 0);
        scheduler.stop();
    }
}
