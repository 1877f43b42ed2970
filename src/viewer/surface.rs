//! Display surface capability
//!
//! Where rendered frames end up. The scheduler only needs paint; everything
//! else about the surface is the embedder's business.

use async_trait::async_trait;

use super::decoder::DecodedFrame;
use crate::error::Result;

/// Target for decoded frames
#[async_trait]
pub trait DisplaySurface: Send + Sync {
    async fn paint(&self, frame: &DecodedFrame) -> Result<()>;
}
