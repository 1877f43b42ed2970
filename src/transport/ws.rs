//! WebSocket transport for viewer connections
//!
//! Wraps an upgraded axum WebSocket. Messages are processed sequentially in
//! arrival order; malformed frames are logged and ignored and never close
//! the channel.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{EventHandler, HostMessage, Transport, TransportEvent, ViewerCommand};
use crate::error::{AppError, Result};
use crate::utils::OnceGuard;

/// Viewer transport over an axum WebSocket
pub struct WsTransport {
    outbound: mpsc::UnboundedSender<Message>,
    handler_tx: watch::Sender<Option<EventHandler>>,
    cancel: CancellationToken,
    closed: OnceGuard,
}

impl WsTransport {
    /// Take ownership of an upgraded socket and spawn its read/write tasks
    pub fn spawn(socket: WebSocket) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (handler_tx, handler_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let transport = Arc::new(Self {
            outbound: outbound_tx,
            handler_tx,
            cancel: cancel.clone(),
            closed: OnceGuard::new(),
        });

        let (sink, stream) = socket.split();
        tokio::spawn(write_loop(sink, outbound_rx, cancel.clone()));
        tokio::spawn(read_loop(stream, handler_rx, cancel));

        transport
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    fn set_event_handler(&self, handler: EventHandler) {
        let _ = self.handler_tx.send(Some(handler));
    }

    async fn send(&self, msg: HostMessage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Transport("channel closed".to_string()));
        }
        let text = serde_json::to_string(&msg)?;
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| AppError::Transport("channel closed".to_string()))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.enter() {
            debug!("Closing viewer transport");
            self.cancel.cancel();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Drain outbound messages onto the socket
async fn write_loop(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            msg = outbound.recv() => {
                match msg {
                    Some(msg) => {
                        if let Err(e) = sink.send(msg).await {
                            warn!("Viewer send failed, closing channel: {}", e);
                            cancel.cancel();
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

/// Process incoming frames sequentially, in arrival order
async fn read_loop(
    mut stream: futures::stream::SplitStream<WebSocket>,
    mut handler_rx: watch::Receiver<Option<EventHandler>>,
    cancel: CancellationToken,
) {
    // Hold the first frames back until the session registers its handler
    let handler = loop {
        if let Some(h) = handler_rx.borrow().clone() {
            break h;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            res = handler_rx.changed() => {
                if res.is_err() {
                    return;
                }
            }
        }
    };

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = stream.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => match ViewerCommand::parse(&text) {
                Ok(cmd) => handler(TransportEvent::Command(cmd)).await,
                Err(e) => {
                    warn!("Ignoring malformed viewer message: {}", e);
                }
            },
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Binary(_))) => {
                warn!("Ignoring binary viewer message (text protocol only)");
            }
            Some(Ok(Message::Close(_))) | None => {
                info!("Viewer disconnected");
                handler(TransportEvent::Closed).await;
                cancel.cancel();
                break;
            }
            Some(Err(e)) => {
                warn!("Viewer receive error: {}", e);
                handler(TransportEvent::Closed).await;
                cancel.cancel();
                break;
            }
        }
    }
}
