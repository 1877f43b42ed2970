//! DevTools WebSocket client
//!
//! One connection to the browser's debugging endpoint serves every session:
//! commands are correlated by monotonically increasing ids, protocol events
//! are fanned out on a broadcast channel and filtered per session.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

/// Event broadcast capacity; slow consumers lag rather than block the reader
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A protocol event pushed by the browser
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Connection to a browser remote-debugging endpoint
pub struct CdpClient {
    next_id: AtomicU64,
    pending: PendingMap,
    outbound: mpsc::UnboundedSender<Message>,
    events: broadcast::Sender<CdpEvent>,
    cancel: CancellationToken,
}

impl CdpClient {
    /// Connect to the browser debugging WebSocket
    pub async fn connect(endpoint: &str) -> Result<Arc<Self>> {
        info!("Connecting to browser debugging endpoint: {}", endpoint);
        let (ws, _) = connect_async(endpoint).await?;
        let (mut sink, mut stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let client = Arc::new(Self {
            next_id: AtomicU64::new(0),
            pending: pending.clone(),
            outbound: outbound_tx,
            events: events_tx.clone(),
            cancel: cancel.clone(),
        });

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    msg = outbound_rx.recv() => match msg {
                        Some(msg) => {
                            if let Err(e) = sink.send(msg).await {
                                warn!("DevTools send failed: {}", e);
                                writer_cancel.cancel();
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    msg = stream.next() => msg,
                };
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        route_incoming(&text, &pending, &events_tx);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("DevTools connection error: {}", e);
                        break;
                    }
                    None => {
                        info!("DevTools connection closed");
                        break;
                    }
                }
            }
            reader_cancel.cancel();
            // Fail anything still waiting for a response
            let waiting: Vec<_> = pending.lock().drain().collect();
            for (_, tx) in waiting {
                let _ = tx.send(Err(AppError::Transport(
                    "DevTools connection closed".to_string(),
                )));
            }
        });

        Ok(client)
    }

    /// Send a command, optionally scoped to an attached session, and await
    /// its response
    pub async fn send(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value> {
        if self.cancel.is_cancelled() {
            return Err(AppError::remote_call(method, "connection closed"));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let mut frame = json!({ "id": id, "method": method, "params": params });
        if let Some(session_id) = session_id {
            frame["sessionId"] = json!(session_id);
        }

        if self.outbound.send(Message::Text(frame.to_string())).is_err() {
            self.pending.lock().remove(&id);
            return Err(AppError::remote_call(method, "connection closed"));
        }

        rx.await
            .map_err(|_| AppError::remote_call(method, "response dropped"))?
    }

    /// Subscribe to protocol events
    pub fn events(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    /// Attach to a target, returning a session handle scoped to it
    pub async fn attach(self: &Arc<Self>, target_id: &str) -> Result<super::CdpSession> {
        let res = self
            .send(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;
        let session_id = res["sessionId"]
            .as_str()
            .ok_or_else(|| AppError::remote_call("Target.attachToTarget", "no sessionId"))?
            .to_string();
        debug!("Attached to target {} as session {}", target_id, session_id);
        Ok(super::CdpSession::new(
            self.clone(),
            target_id.to_string(),
            session_id,
        ))
    }

    /// Create a new page target and return its id
    pub async fn create_page(&self, url: &str) -> Result<String> {
        let res = self
            .send("Target.createTarget", json!({ "url": url }), None)
            .await?;
        res["targetId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AppError::remote_call("Target.createTarget", "no targetId"))
    }

    /// Close a target
    pub async fn close_target(&self, target_id: &str) -> Result<()> {
        self.send("Target.closeTarget", json!({ "targetId": target_id }), None)
            .await?;
        Ok(())
    }

    /// Drop the connection
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Route one incoming frame to either a pending command or the event bus
fn route_incoming(text: &str, pending: &PendingMap, events: &broadcast::Sender<CdpEvent>) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("Ignoring malformed DevTools frame: {}", e);
            return;
        }
    };

    if let Some(id) = frame["id"].as_u64() {
        let Some(tx) = pending.lock().remove(&id) else {
            debug!("Response for unknown command id {}", id);
            return;
        };
        let result = if frame["error"].is_object() {
            let message = frame["error"]["message"].as_str().unwrap_or("unknown");
            Err(AppError::remote_call(format!("id {id}"), message))
        } else {
            Ok(frame["result"].clone())
        };
        let _ = tx.send(result);
        return;
    }

    if let Some(method) = frame["method"].as_str() {
        let event = CdpEvent {
            method: method.to_string(),
            params: frame["params"].clone(),
            session_id: frame["sessionId"].as_str().map(str::to_string),
        };
        // No subscribers is fine; events are best-effort
        let _ = events.send(event);
    }
}
