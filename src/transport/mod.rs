//! Bidirectional viewer channel
//!
//! The session coordinator exclusively owns its transport. Incoming traffic
//! reaches the coordinator through a registered event handler rather than a
//! back-reference, so there is no ownership cycle between the two.

pub mod protocol;
mod ws;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::error::Result;
pub use protocol::{
    ChunkKind, DecoderConfig, EncodedChunk, HostMessage, ScreencastParams, ViewerCommand,
    ViewportParams, CMD_SET_VIEWPORT, CMD_START_SCREENCAST,
};
pub use ws::WsTransport;

/// Something that happened on the viewer channel
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A parsed viewer→host command, delivered in arrival order
    Command(ViewerCommand),
    /// The peer went away; the session should wind down its pipeline
    Closed,
}

/// Handler invoked sequentially for each transport event
pub type EventHandler = Arc<dyn Fn(TransportEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Message channel between the session coordinator and a remote viewer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Register the event handler. Events received before registration are
    /// held back, not dropped.
    fn set_event_handler(&self, handler: EventHandler);

    /// Send a host→viewer message
    async fn send(&self, msg: HostMessage) -> Result<()>;

    /// Close the channel. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Whether the channel has been closed
    fn is_closed(&self) -> bool;
}
