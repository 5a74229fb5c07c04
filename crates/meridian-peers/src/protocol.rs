//! Protocol handler interfaces: request/response and gossip.

use async_trait::async_trait;

use meridian_core::{Metadata, PeerId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityQueryError {
    #[error("capability query timed out")]
    Timeout,
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Request/response protocol handler.
///
/// Requests dial the peer if no session is open, so a successful
/// `metadata` call leaves the peer connected.
#[async_trait]
pub trait ReqResp: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self);

    /// Ask a peer for its capability payload.
    async fn metadata(&self, peer: &PeerId) -> Result<Metadata, CapabilityQueryError>;
}

/// Publish/subscribe gossip handler. Only its lifecycle matters here.
#[async_trait]
pub trait Gossip: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self);
}
