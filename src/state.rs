//! Application-wide state
//!
//! One process holds one DevTools connection and a live session map indexed
//! by target. Nothing here survives a restart; in-flight sessions are not
//! recovered.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::info;

use crate::capture::ScreencastCapture;
use crate::cdp::{CdpClient, RemoteSession};
use crate::config::AppConfig;
use crate::error::Result;
use crate::relay::CdpSandboxFactory;
use crate::session::SessionCoordinator;

/// Live session map, keyed by browser target id
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionCoordinator>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, target_id: &str) -> Option<Arc<SessionCoordinator>> {
        self.sessions.read().get(target_id).cloned()
    }

    pub fn insert(&self, target_id: &str, session: Arc<SessionCoordinator>) {
        self.sessions
            .write()
            .insert(target_id.to_string(), session);
    }

    pub fn remove(&self, target_id: &str) -> Option<Arc<SessionCoordinator>> {
        self.sessions.write().remove(target_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn drain(&self) -> Vec<Arc<SessionCoordinator>> {
        self.sessions.write().drain().map(|(_, s)| s).collect()
    }
}

/// Application-wide state shared across handlers
pub struct AppState {
    /// Configuration (immutable after startup)
    pub config: AppConfig,
    /// Shared DevTools connection
    pub cdp: Arc<CdpClient>,
    /// Live sessions by target
    pub sessions: SessionRegistry,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
    /// Serializes session creation per process
    create_lock: Mutex<()>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        cdp: Arc<CdpClient>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            cdp,
            sessions: SessionRegistry::new(),
            shutdown_tx,
            create_lock: Mutex::new(()),
        })
    }

    /// Resolve the session for a target, creating it on first use
    ///
    /// Failure to attach to the target (the capture handle) is the fatal
    /// setup condition; it aborts this session's setup and surfaces to the
    /// caller.
    pub async fn session_for_target(&self, target_id: &str) -> Result<Arc<SessionCoordinator>> {
        if let Some(session) = self.sessions.get(target_id) {
            return Ok(session);
        }

        let _guard = self.create_lock.lock().await;
        if let Some(session) = self.sessions.get(target_id) {
            return Ok(session);
        }

        let remote: Arc<dyn RemoteSession> = Arc::new(self.cdp.attach(target_id).await?);
        let capture = Arc::new(ScreencastCapture::new(remote.clone()));
        let sandboxes = Arc::new(CdpSandboxFactory::new(self.cdp.clone()));
        let session = SessionCoordinator::new(
            target_id,
            capture,
            remote,
            sandboxes,
            self.config.browser.encoder_url.clone(),
            (self.config.capture.width, self.config.capture.height),
        );
        self.sessions.insert(target_id, session.clone());
        info!(target = %target_id, total = self.sessions.len(), "Session registered");
        Ok(session)
    }

    /// Close every live session, in no particular order
    pub async fn close_all(&self) {
        let sessions = self.sessions.drain();
        info!("Closing {} live sessions", sessions.len());
        for session in sessions {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_basics() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get("T1").is_none());
        assert!(registry.remove("T1").is_none());
        assert_eq!(registry.len(), 0);
    }
}
