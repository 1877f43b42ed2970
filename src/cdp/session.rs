//! Target-scoped remote-debugging session
//!
//! All remote-debugging calls for one logical session go through a single
//! handle, keeping them serialized on one DevTools session id.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::client::{CdpClient, CdpEvent};
use crate::error::Result;

/// Per-session event buffer; slow consumers lag rather than block
const SESSION_EVENT_CAPACITY: usize = 128;

/// Handle to the remote-debugging session backing one logical session
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Send a command scoped to this session
    async fn send(&self, method: &str, params: Value) -> Result<Value>;

    /// Subscribe to protocol events scoped to this session
    fn events(&self) -> broadcast::Receiver<CdpEvent>;

    /// Detach from the target
    async fn detach(&self) -> Result<()>;
}

/// DevTools-backed session handle
pub struct CdpSession {
    client: Arc<CdpClient>,
    target_id: String,
    session_id: String,
    events: broadcast::Sender<CdpEvent>,
    cancel: CancellationToken,
}

impl CdpSession {
    pub(super) fn new(client: Arc<CdpClient>, target_id: String, session_id: String) -> Self {
        let (events_tx, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        let cancel = CancellationToken::new();

        // Refilter the client-wide event bus down to this session
        let mut client_events = client.events();
        let filter_id = session_id.clone();
        let filtered = events_tx.clone();
        let filter_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = filter_cancel.cancelled() => break,
                    event = client_events.recv() => event,
                };
                match event {
                    Ok(event) if event.session_id.as_deref() == Some(&filter_id) => {
                        let _ = filtered.send(event);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Session event stream lagged by {} events", n);
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            client,
            target_id,
            session_id,
            events: events_tx,
            cancel,
        }
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }
}

#[async_trait]
impl RemoteSession for CdpSession {
    async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.client
            .send(method, params, Some(&self.session_id))
            .await
    }

    fn events(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    async fn detach(&self) -> Result<()> {
        self.cancel.cancel();
        self.client
            .send(
                "Target.detachFromTarget",
                json!({ "sessionId": self.session_id }),
                None,
            )
            .await?;
        debug!("Detached from target {}", self.target_id);
        Ok(())
    }
}

impl Drop for CdpSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
