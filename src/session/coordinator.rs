//! Session coordinator
//!
//! Owns exactly one capture-source binding, one relay host, and one viewer
//! transport. Intercepts the start-capture and set-viewport commands,
//! forwards everything else verbatim to the remote-debugging session, and
//! tears the whole arrangement down in a fixed, fault-tolerant order.

use parking_lot::Mutex as PlMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::safe_call;
use crate::capture::{CaptureSource, FrameEvent};
use crate::cdp::RemoteSession;
use crate::error::{AppError, Result};
use crate::relay::{RelayHost, SandboxFactory};
use crate::transport::{
    ScreencastParams, Transport, TransportEvent, ViewerCommand, ViewportParams,
};
use crate::utils::OnceGuard;

/// Captured frames buffered between capture and relay; shallow on purpose,
/// overflow is shed at the sink
const FRAME_SINK_DEPTH: usize = 4;

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Transport may be attached, no capture running
    Idle,
    /// Frames are flowing
    CaptureActive,
    /// A viewport change is being applied
    Reconfiguring,
    /// Teardown in progress
    Closing,
    /// Terminal
    Closed,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorState::Idle => write!(f, "Idle"),
            CoordinatorState::CaptureActive => write!(f, "CaptureActive"),
            CoordinatorState::Reconfiguring => write!(f, "Reconfiguring"),
            CoordinatorState::Closing => write!(f, "Closing"),
            CoordinatorState::Closed => write!(f, "Closed"),
        }
    }
}

/// Transport-scoped wiring, replaced wholesale when a new viewer attaches
#[derive(Default)]
struct Links {
    transport: Option<Arc<dyn Transport>>,
    /// Forwards relay output onto the current transport
    forward_task: Option<JoinHandle<()>>,
}

/// Coordinator for one logical session
pub struct SessionCoordinator {
    id: String,
    target_id: String,
    capture: Arc<dyn CaptureSource>,
    remote: Arc<dyn RemoteSession>,
    sandboxes: Arc<dyn SandboxFactory>,
    encoder_url: String,
    state: PlMutex<CoordinatorState>,
    links: Mutex<Links>,
    /// Shared with the frame pump so it always submits to the current host
    relay: Arc<RwLock<Option<Arc<RelayHost>>>>,
    viewport: PlMutex<(u32, u32)>,
    capture_bound: AtomicBool,
    pump_task: PlMutex<Option<JoinHandle<()>>>,
    closed: OnceGuard,
}

impl SessionCoordinator {
    pub fn new(
        target_id: impl Into<String>,
        capture: Arc<dyn CaptureSource>,
        remote: Arc<dyn RemoteSession>,
        sandboxes: Arc<dyn SandboxFactory>,
        encoder_url: impl Into<String>,
        default_viewport: (u32, u32),
    ) -> Arc<Self> {
        let target_id = target_id.into();
        let id = uuid::Uuid::new_v4().to_string();
        info!(session = %id, target = %target_id, "Session created");
        Arc::new(Self {
            id,
            target_id,
            capture,
            remote,
            sandboxes,
            encoder_url: encoder_url.into(),
            state: PlMutex::new(CoordinatorState::Idle),
            links: Mutex::new(Links::default()),
            relay: Arc::new(RwLock::new(None)),
            viewport: PlMutex::new(default_viewport),
            capture_bound: AtomicBool::new(false),
            pump_task: PlMutex::new(None),
            closed: OnceGuard::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.lock()
    }

    /// Attach a viewer transport, replacing any existing one
    ///
    /// Replacement forces full teardown of the prior relay host first — no
    /// two relay hosts are ever alive for one session. An already-bound
    /// capture subscription is left intact.
    pub async fn attach_transport(self: &Arc<Self>, transport: Arc<dyn Transport>) {
        if self.closed.is_done() {
            warn!(session = %self.id, "Attach on closed session, refusing");
            let _ = transport.close().await;
            return;
        }

        let mut links = self.links.lock().await;
        if let Some(old) = links.transport.take() {
            info!(session = %self.id, "Replacing viewer transport");
            let _ = old.close().await;
        }
        if let Some(task) = links.forward_task.take() {
            task.abort();
        }
        if let Some(relay) = self.relay.write().await.take() {
            relay.close().await;
        }

        let weak = Arc::downgrade(self);
        transport.set_event_handler(Arc::new(move |event| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.on_transport_event(event).await;
                }
            })
        }));
        links.transport = Some(transport);
        *self.state.lock() = CoordinatorState::Idle;
    }

    async fn on_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Command(cmd) => self.handle_command(cmd).await,
            TransportEvent::Closed => self.on_viewer_gone().await,
        }
    }

    /// Handle one viewer command, in arrival order
    pub async fn handle_command(&self, cmd: ViewerCommand) {
        if self.closed.is_done() {
            return;
        }
        match cmd {
            ViewerCommand::StartScreencast(params) => self.start_screencast(params).await,
            ViewerCommand::SetViewport(params) => self.apply_viewport(params).await,
            ViewerCommand::Passthrough { command, params } => {
                // Fire-and-forget; a failed forward never surfaces to the
                // viewer and never closes the channel
                safe_call(&command, self.remote.send(&command, params)).await;
            }
        }
    }

    /// Intercepted start-capture command
    async fn start_screencast(&self, params: ScreencastParams) {
        let mut links = self.links.lock().await;
        let Some(transport) = links.transport.clone() else {
            warn!(session = %self.id, "Start capture with no transport attached");
            return;
        };

        if self.relay.read().await.is_none() {
            match self.create_relay(&transport).await {
                Ok((relay, forward_task)) => {
                    links.forward_task = Some(forward_task);
                    *self.relay.write().await = Some(relay);
                }
                Err(e) => {
                    warn!(session = %self.id, "Relay host setup failed: {}", e);
                    return;
                }
            }
        }
        drop(links);

        let (width, height) = *self.viewport.lock();
        if let Some(relay) = self.relay.read().await.clone() {
            safe_call("configure encoder", relay.configure(width, height)).await;
        }

        if !self.capture_bound.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.bind_capture().await {
                // Failing to obtain the capture handle is the fatal setup
                // condition; this session will never produce frames
                self.capture_bound.store(false, Ordering::SeqCst);
                warn!(session = %self.id, "Capture setup failed: {}", e);
                return;
            }
        }

        safe_call("start capture", self.capture.start(&params)).await;
        *self.state.lock() = CoordinatorState::CaptureActive;
        info!(session = %self.id, "Capture active");
    }

    /// Subscribe to the capture source and spawn the frame pump
    async fn bind_capture(&self) -> Result<()> {
        let (frame_tx, frame_rx) = mpsc::channel::<FrameEvent>(FRAME_SINK_DEPTH);
        let (err_tx, mut err_rx) = mpsc::channel::<AppError>(8);
        self.capture.subscribe(frame_tx, err_tx).await?;

        let session = self.id.clone();
        tokio::spawn(async move {
            while let Some(e) = err_rx.recv().await {
                warn!(session = %session, "Capture error: {}", e);
            }
        });

        let relay = self.relay.clone();
        *self.pump_task.lock() = Some(tokio::spawn(pump_frames(frame_rx, relay)));
        Ok(())
    }

    /// Intercepted set-viewport command: viewport first, then encoder
    async fn apply_viewport(&self, params: ViewportParams) {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            *state = CoordinatorState::Reconfiguring;
            previous
        };

        *self.viewport.lock() = (params.width, params.height);
        safe_call(
            "set viewport",
            self.capture.set_viewport(params.width, params.height),
        )
        .await;
        if let Some(relay) = self.relay.read().await.clone() {
            safe_call(
                "reconfigure encoder",
                relay.configure(params.width, params.height),
            )
            .await;
        }

        *self.state.lock() = previous;
    }

    /// Build a relay host and the task forwarding its output to the viewer
    async fn create_relay(
        &self,
        transport: &Arc<dyn Transport>,
    ) -> Result<(Arc<RelayHost>, JoinHandle<()>)> {
        let sandbox = self.sandboxes.create().await?;
        let (output_tx, mut output_rx) = mpsc::unbounded_channel();
        let relay = RelayHost::create(sandbox, &self.encoder_url, output_tx).await?;

        let transport = transport.clone();
        let forward_task = tokio::spawn(async move {
            while let Some(msg) = output_rx.recv().await {
                if let Err(e) = transport.send(msg).await {
                    debug!("Dropping relay output, transport gone: {}", e);
                }
            }
        });
        Ok((relay, forward_task))
    }

    /// The viewer went away: stop producing, keep the session
    async fn on_viewer_gone(&self) {
        if self.closed.is_done() {
            return;
        }
        info!(session = %self.id, "Viewer gone, stopping capture");
        safe_call("stop capture", self.capture.stop()).await;

        let mut links = self.links.lock().await;
        if let Some(task) = links.forward_task.take() {
            task.abort();
        }
        links.transport = None;
        if let Some(relay) = self.relay.write().await.take() {
            relay.close().await;
        }
        *self.state.lock() = CoordinatorState::Idle;
    }

    /// Tear the session down: stop capture, detach the remote session,
    /// close the relay host, close the transport — in that order, each step
    /// independently guarded, none retried. Idempotent.
    pub async fn close(&self) {
        if !self.closed.enter() {
            return;
        }
        *self.state.lock() = CoordinatorState::Closing;

        safe_call("stop capture", self.capture.stop()).await;
        safe_call("detach remote session", self.remote.detach()).await;
        if let Some(relay) = self.relay.write().await.take() {
            relay.close().await;
        }

        let mut links = self.links.lock().await;
        if let Some(task) = links.forward_task.take() {
            task.abort();
        }
        if let Some(transport) = links.transport.take() {
            let _ = transport.close().await;
        }
        if let Some(task) = self.pump_task.lock().take() {
            task.abort();
        }

        *self.state.lock() = CoordinatorState::Closed;
        info!(session = %self.id, "Session closed");
    }
}

/// Feed captured frames to whatever relay host is current
///
/// The relay applies the drop policy; a missing host simply sheds the frame.
async fn pump_frames(
    mut frames: mpsc::Receiver<FrameEvent>,
    relay: Arc<RwLock<Option<Arc<RelayHost>>>>,
) {
    while let Some(frame) = frames.recv().await {
        let host = relay.read().await.clone();
        match host {
            Some(host) => {
                host.submit(frame).await;
            }
            None => debug!("No relay host, discarding captured frame"),
        }
    }
}
