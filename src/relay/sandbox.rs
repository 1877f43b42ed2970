//! Sandboxed encoder execution context
//!
//! The encoder runs inside an isolated browser page. The host only ever
//! talks to it through this narrow surface: evaluate a script, receive
//! callback payloads, navigate, close.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cdp::{CdpClient, RemoteSession};
use crate::error::{AppError, Result};

/// Handler for payloads pushed out of the sandbox
pub type SandboxCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Isolated execution context hosting the encode stage
#[async_trait]
pub trait EncoderSandbox: Send + Sync {
    /// Call `function` inside the sandbox with a single JSON argument
    async fn evaluate(&self, function: &str, args: Value) -> Result<Value>;

    /// Expose `name` inside the sandbox; payloads it is called with are
    /// delivered to `handler`
    async fn expose_callback(&self, name: &str, handler: SandboxCallback) -> Result<()>;

    /// Load the sandbox document
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Tear the sandbox down
    async fn close(&self) -> Result<()>;
}

/// Creates sandboxes; one per relay host instance
#[async_trait]
pub trait SandboxFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn EncoderSandbox>>;
}

/// Sandbox backed by a dedicated browser page target
pub struct CdpSandbox {
    client: Arc<CdpClient>,
    session: Arc<dyn RemoteSession>,
    target_id: String,
    bindings: Arc<RwLock<HashMap<String, SandboxCallback>>>,
    cancel: CancellationToken,
}

impl CdpSandbox {
    pub fn new(
        client: Arc<CdpClient>,
        session: Arc<dyn RemoteSession>,
        target_id: String,
    ) -> Arc<Self> {
        let bindings: Arc<RwLock<HashMap<String, SandboxCallback>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let cancel = CancellationToken::new();

        // Route Runtime.bindingCalled events into the registered handlers
        let mut events = session.events();
        let routed = bindings.clone();
        let route_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = route_cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Sandbox event stream lagged by {} events", n);
                        continue;
                    }
                    Err(_) => break,
                };
                if event.method != "Runtime.bindingCalled" {
                    continue;
                }
                let Some(name) = event.params["name"].as_str() else {
                    continue;
                };
                let Some(handler) = routed.read().get(name).cloned() else {
                    continue;
                };
                match event.params["payload"]
                    .as_str()
                    .map(serde_json::from_str::<Value>)
                {
                    Some(Ok(payload)) => handler(payload),
                    _ => warn!("Sandbox binding {} called with bad payload", name),
                }
            }
        });

        Arc::new(Self {
            client,
            session,
            target_id,
            bindings,
            cancel,
        })
    }
}

#[async_trait]
impl EncoderSandbox for CdpSandbox {
    async fn evaluate(&self, function: &str, args: Value) -> Result<Value> {
        let expression = format!("{function}({args})");
        let res = self
            .session
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                }),
            )
            .await?;
        if let Some(desc) = res["exceptionDetails"]["exception"]["description"].as_str() {
            return Err(AppError::Encode(format!("sandbox threw: {desc}")));
        }
        Ok(res["result"]["value"].clone())
    }

    async fn expose_callback(&self, name: &str, handler: SandboxCallback) -> Result<()> {
        self.session
            .send("Runtime.addBinding", json!({ "name": name }))
            .await?;
        self.bindings.write().insert(name.to_string(), handler);
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.session.send("Page.navigate", json!({ "url": url })).await?;
        debug!("Sandbox navigated to {}", url);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        self.client.close_target(&self.target_id).await
    }
}

impl Drop for CdpSandbox {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Creates page-backed sandboxes from the shared DevTools connection
pub struct CdpSandboxFactory {
    client: Arc<CdpClient>,
}

impl CdpSandboxFactory {
    pub fn new(client: Arc<CdpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SandboxFactory for CdpSandboxFactory {
    async fn create(&self) -> Result<Arc<dyn EncoderSandbox>> {
        let target_id = self.client.create_page("about:blank").await?;
        let session: Arc<dyn RemoteSession> = Arc::new(self.client.attach(&target_id).await?);
        // Binding events only flow with the runtime domain enabled
        session.send("Runtime.enable", json!({})).await?;
        Ok(CdpSandbox::new(self.client.clone(), session, target_id))
    }
}
