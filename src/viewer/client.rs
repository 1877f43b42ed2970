//! Viewer client
//!
//! The viewer half of the protocol: connects to the host WebSocket, starts
//! the screencast, feeds the two host message kinds into the decode queue,
//! and sends input and debounced resize commands upstream.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::decode_queue::{DecodeQueue, FrameLedger};
use super::decoder::DecoderFactory;
use super::render::{PendingFrames, RenderScheduler};
use super::surface::DisplaySurface;
use crate::error::Result;
use crate::transport::{HostMessage, ScreencastParams, ViewerCommand, CMD_SET_VIEWPORT};
use crate::utils::{Debouncer, OnceGuard};

/// Viewer client settings
#[derive(Debug, Clone)]
pub struct ViewerClientConfig {
    /// Host WebSocket URL, including the target query parameter
    pub url: String,
    pub screencast: ScreencastParams,
    /// Quiescence window for resize coalescing
    pub resize_quiescence: Duration,
}

impl Default for ViewerClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8600/ws/viewer".to_string(),
            screencast: ScreencastParams::default(),
            resize_quiescence: Duration::from_millis(500),
        }
    }
}

/// Connected viewer session
pub struct ViewerClient {
    outbound: mpsc::UnboundedSender<Message>,
    debouncer: Debouncer,
    queue: Arc<DecodeQueue>,
    scheduler: Arc<RenderScheduler>,
    cancel: CancellationToken,
    closed: OnceGuard,
}

impl ViewerClient {
    /// Connect and start the screencast
    ///
    /// Failure to reach the host is the one fatal setup condition on this
    /// side; everything after degrades gracefully.
    pub async fn connect(
        config: ViewerClientConfig,
        factory: Arc<dyn DecoderFactory>,
        surface: Arc<dyn DisplaySurface>,
    ) -> Result<Self> {
        let (ws, _) = connect_async(&config.url).await.map_err(|e| {
            error!("Could not reach viewer endpoint {}: {}", config.url, e);
            e
        })?;
        info!("Connected to {}", config.url);
        let (mut sink, mut stream) = ws.split();

        let ledger = Arc::new(FrameLedger::new());
        let pending = PendingFrames::new();
        let scheduler = RenderScheduler::spawn(pending.clone(), ledger.clone(), surface);
        let queue = DecodeQueue::new(factory, ledger, pending);

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let cancel = CancellationToken::new();

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    msg = outbound_rx.recv() => match msg {
                        Some(msg) => {
                            if let Err(e) = sink.send(msg).await {
                                warn!("Viewer send failed: {}", e);
                                writer_cancel.cancel();
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        let read_queue = queue.clone();
        let read_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = read_cancel.cancelled() => break,
                    msg = stream.next() => msg,
                };
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<HostMessage>(&text) {
                            Ok(HostMessage::ConfigVideoDecoder(config)) => {
                                read_queue.on_config(config).await;
                            }
                            Ok(HostMessage::VideoChunk(chunk)) => {
                                read_queue.on_chunk(chunk).await;
                            }
                            Err(e) => warn!("Ignoring malformed host message: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        error!("Session complete: host closed the connection");
                        read_cancel.cancel();
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("Viewer receive error: {}", e);
                        read_cancel.cancel();
                        break;
                    }
                }
            }
        });

        let client = Self {
            outbound,
            debouncer: Debouncer::new(config.resize_quiescence),
            queue,
            scheduler,
            cancel,
            closed: OnceGuard::new(),
        };
        client.send_command(
            crate::transport::CMD_START_SCREENCAST,
            serde_json::to_value(&config.screencast)?,
        );
        Ok(client)
    }

    /// Send a command envelope to the host
    ///
    /// Input events and navigation go through here unmodified; the host
    /// forwards anything it does not intercept.
    pub fn send_command(&self, command: &str, params: Value) {
        let text = ViewerCommand::envelope(command, &params);
        if self.outbound.send(Message::Text(text)).is_err() {
            debug!("Viewer channel gone, dropping {}", command);
        }
    }

    /// Request a viewport resize, coalescing bursts
    ///
    /// The set-viewport command fires once, after resize input has been
    /// quiet for the configured window.
    pub fn request_resize(&self, width: u32, height: u32) {
        let outbound = self.outbound.clone();
        self.debouncer.call(move || {
            let params = json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1,
                "mobile": true,
            });
            let text = ViewerCommand::envelope(CMD_SET_VIEWPORT, &params);
            if outbound.send(Message::Text(text)).is_err() {
                debug!("Viewer channel gone, dropping resize");
            }
        });
    }

    /// Number of frames painted so far
    pub fn rendered(&self) -> u64 {
        self.scheduler.rendered()
    }

    /// Disconnect and release the pipeline. Idempotent.
    pub async fn close(&self) {
        if !self.closed.enter() {
            return;
        }
        self.debouncer.cancel();
        self.cancel.cancel();
        self.scheduler.stop();
        self.queue.close().await;
        info!("Viewer client closed");
    }
}
