//! DevTools screencast capture source
//!
//! Drives `Page.startScreencast` on the remote-debugging session and turns
//! `Page.screencastFrame` events into [`FrameEvent`]s. Every frame is
//! acknowledged immediately so the browser keeps producing, regardless of
//! what happens to it downstream.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CaptureSource, ErrorSink, FrameEvent, FrameMetadata, FrameSink};
use crate::cdp::RemoteSession;
use crate::error::{AppError, Result};
use crate::transport::ScreencastParams;
use crate::utils::seconds_to_micros;

const EVT_SCREENCAST_FRAME: &str = "Page.screencastFrame";

/// Screencast-backed capture source
pub struct ScreencastCapture {
    session: Arc<dyn RemoteSession>,
    subscription: Mutex<Option<CancellationToken>>,
}

impl ScreencastCapture {
    pub fn new(session: Arc<dyn RemoteSession>) -> Self {
        Self {
            session,
            subscription: Mutex::new(None),
        }
    }
}

#[async_trait]
impl CaptureSource for ScreencastCapture {
    async fn subscribe(&self, frames: FrameSink, errors: ErrorSink) -> Result<()> {
        let cancel = CancellationToken::new();
        if let Some(prev) = self.subscription.lock().replace(cancel.clone()) {
            prev.cancel();
        }

        let events = self.session.events();
        let session = self.session.clone();
        tokio::spawn(pump_frames(events, session, frames, errors, cancel));
        Ok(())
    }

    async fn start(&self, params: &ScreencastParams) -> Result<()> {
        if self.subscription.lock().is_none() {
            return Err(AppError::Capture("no frame subscription bound".to_string()));
        }
        self.session
            .send("Page.startScreencast", serde_json::to_value(params)?)
            .await?;
        debug!("Screencast started: {:?}", params);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.session.send("Page.stopScreencast", json!({})).await?;
        debug!("Screencast stopped");
        Ok(())
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        self.session
            .send(
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": width,
                    "height": height,
                    "deviceScaleFactor": 1,
                    "mobile": true,
                }),
            )
            .await?;
        debug!("Viewport set to {}x{}", width, height);
        Ok(())
    }
}

impl Drop for ScreencastCapture {
    fn drop(&mut self) {
        if let Some(token) = self.subscription.lock().take() {
            token.cancel();
        }
    }
}

/// Turn screencast events into frame events, acking each one
async fn pump_frames(
    mut events: broadcast::Receiver<crate::cdp::CdpEvent>,
    session: Arc<dyn RemoteSession>,
    frames: FrameSink,
    errors: ErrorSink,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let event = match event {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Screencast event stream lagged by {} events", n);
                continue;
            }
            Err(_) => break,
        };
        if event.method != EVT_SCREENCAST_FRAME {
            continue;
        }

        let frame = match parse_frame(&event.params) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping unparseable screencast frame: {}", e);
                let _ = errors.try_send(e);
                continue;
            }
        };

        // Ack first so the browser never waits on the pipeline
        if let Err(e) = session
            .send(
                "Page.screencastFrameAck",
                json!({ "sessionId": frame.ack_id }),
            )
            .await
        {
            warn!("Screencast ack failed: {}", e);
        }

        // A full sink means the pipeline is behind; shed the frame here
        if frames.try_send(frame).is_err() {
            debug!("Frame sink full, discarding captured frame");
        }
    }
}

/// Decode one `Page.screencastFrame` payload
///
/// DevTools reports the capture time as fractional Unix seconds; this is the
/// one place it becomes microseconds.
fn parse_frame(params: &Value) -> Result<FrameEvent> {
    let data = params["data"]
        .as_str()
        .ok_or_else(|| AppError::Capture("frame missing data".to_string()))?;
    let image_data = BASE64
        .decode(data.as_bytes())
        .map_err(|e| AppError::Capture(format!("bad frame payload: {e}")))?;

    let metadata = &params["metadata"];
    let timestamp = metadata["timestamp"]
        .as_f64()
        .ok_or_else(|| AppError::Capture("frame missing timestamp".to_string()))?;

    Ok(FrameEvent {
        image_data: Bytes::from(image_data),
        metadata: FrameMetadata {
            capture_timestamp_us: seconds_to_micros(timestamp),
            width: metadata["deviceWidth"].as_u64().unwrap_or(0) as u32,
            height: metadata["deviceHeight"].as_u64().unwrap_or(0) as u32,
        },
        ack_id: params["sessionId"]
            .as_i64()
            .ok_or_else(|| AppError::Capture("frame missing sessionId".to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::CdpEvent;
    use parking_lot::Mutex as PlMutex;
    use tokio::sync::mpsc;

    struct FakeSession {
        sent: PlMutex<Vec<(String, Value)>>,
        events: broadcast::Sender<CdpEvent>,
    }

    impl FakeSession {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: PlMutex::new(Vec::new()),
                events: broadcast::channel(16).0,
            })
        }

        fn sent_methods(&self) -> Vec<String> {
            self.sent.lock().iter().map(|(m, _)| m.clone()).collect()
        }

        fn emit_frame(&self, data: &str, timestamp: f64, ack_id: i64) {
            let _ = self.events.send(CdpEvent {
                method: EVT_SCREENCAST_FRAME.to_string(),
                params: json!({
                    "data": data,
                    "metadata": {
                        "timestamp": timestamp,
                        "deviceWidth": 1280,
                        "deviceHeight": 720,
                    },
                    "sessionId": ack_id,
                }),
                session_id: Some("S1".to_string()),
            });
        }
    }

    #[async_trait]
    impl RemoteSession for FakeSession {
        async fn send(&self, method: &str, params: Value) -> Result<Value> {
            self.sent.lock().push((method.to_string(), params));
            Ok(json!({}))
        }

        fn events(&self) -> broadcast::Receiver<CdpEvent> {
            self.events.subscribe()
        }

        async fn detach(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_start_requires_subscription() {
        let session = FakeSession::new();
        let capture = ScreencastCapture::new(session.clone());
        assert!(capture.start(&ScreencastParams::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_start_sends_screencast_command() {
        let session = FakeSession::new();
        let capture = ScreencastCapture::new(session.clone());
        let (frame_tx, _frame_rx) = mpsc::channel(4);
        let (err_tx, _err_rx) = mpsc::channel(4);
        capture.subscribe(frame_tx, err_tx).await.unwrap();
        capture.start(&ScreencastParams::default()).await.unwrap();

        let sent = session.sent.lock();
        let (method, params) = &sent[0];
        assert_eq!(method, "Page.startScreencast");
        assert_eq!(params["format"], "jpeg");
        assert_eq!(params["everyNthFrame"], 1);
    }

    #[tokio::test]
    async fn test_frame_converted_and_acked() {
        let session = FakeSession::new();
        let capture = ScreencastCapture::new(session.clone());
        let (frame_tx, mut frame_rx) = mpsc::channel(4);
        let (err_tx, _err_rx) = mpsc::channel(4);
        capture.subscribe(frame_tx, err_tx).await.unwrap();

        // "AQID" is [1, 2, 3]
        session.emit_frame("AQID", 1700000000.5, 42);

        let frame = frame_rx.recv().await.unwrap();
        assert_eq!(frame.image_data.as_ref(), &[1, 2, 3]);
        assert_eq!(frame.metadata.capture_timestamp_us, 1_700_000_000_500_000);
        assert_eq!(frame.metadata.width, 1280);
        assert_eq!(frame.ack_id, 42);

        assert!(session
            .sent_methods()
            .contains(&"Page.screencastFrameAck".to_string()));
    }

    #[tokio::test]
    async fn test_set_viewport_overrides_metrics() {
        let session = FakeSession::new();
        let capture = ScreencastCapture::new(session.clone());
        capture.set_viewport(800, 600).await.unwrap();

        let sent = session.sent.lock();
        let (method, params) = &sent[0];
        assert_eq!(method, "Emulation.setDeviceMetricsOverride");
        assert_eq!(params["width"], 800);
        assert_eq!(params["height"], 600);
    }

    #[tokio::test]
    async fn test_bad_frame_reported_not_fatal() {
        let session = FakeSession::new();
        let capture = ScreencastCapture::new(session.clone());
        let (frame_tx, mut frame_rx) = mpsc::channel(4);
        let (err_tx, mut err_rx) = mpsc::channel(4);
        capture.subscribe(frame_tx, err_tx).await.unwrap();

        let _ = session.events.send(CdpEvent {
            method: EVT_SCREENCAST_FRAME.to_string(),
            params: json!({ "data": "!!!not-base64!!!", "metadata": {}, "sessionId": 1 }),
            session_id: Some("S1".to_string()),
        });
        assert!(err_rx.recv().await.is_some());

        // Pump survives; a good frame still comes through
        session.emit_frame("AQID", 1.0, 2);
        assert!(frame_rx.recv().await.is_some());
    }
}
