//! Pagecast - Near-real-time remote viewer for headless browser sessions
//!
//! This crate captures a headless browser's rendered output, relays it
//! through a sandboxed encode stage, carries the encoded chunks over a
//! WebSocket to a remote viewer, and relays viewer input back into the
//! browser session.

pub mod capture;
pub mod cdp;
pub mod config;
pub mod error;
pub mod relay;
pub mod session;
pub mod state;
pub mod transport;
pub mod utils;
pub mod viewer;
pub mod web;

pub use error::{AppError, Result};
