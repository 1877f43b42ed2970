//! Chrome DevTools Protocol plumbing
//!
//! A minimal CDP client over tokio-tungstenite: id-correlated command
//! dispatch, protocol-event fan-out, and target-scoped session handles.

mod client;
mod session;

pub use client::{CdpClient, CdpEvent};
pub use session::{CdpSession, RemoteSession};
