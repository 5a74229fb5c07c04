use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use meridian_core::{Metadata, PeerId};
use meridian_peers::{CapabilityQueryError, DialError, ReqResp, Transport};

use super::transport::{Behaviour, MemoryTransport};

/// Answers metadata requests on behalf of the transport's simulated remotes.
/// A request dials the peer first, the way a real stream would.
pub struct MemoryReqResp {
    transport: Arc<MemoryTransport>,
    started: AtomicBool,
    requests: AtomicUsize,
}

impl MemoryReqResp {
    pub fn new(transport: Arc<MemoryTransport>) -> Self {
        Self {
            transport,
            started: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReqResp for MemoryReqResp {
    async fn start(&self) -> anyhow::Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    async fn metadata(&self, peer: &PeerId) -> Result<Metadata, CapabilityQueryError> {
        if !self.is_started() {
            return Err(CapabilityQueryError::Protocol("req/resp not started".into()));
        }
        self.requests.fetch_add(1, Ordering::SeqCst);

        match self.transport.dial(peer).await {
            Ok(()) => {}
            Err(DialError::Timeout) => return Err(CapabilityQueryError::Timeout),
            Err(e) => return Err(CapabilityQueryError::Protocol(e.to_string())),
        }

        let remote = self
            .transport
            .remote(peer)
            .ok_or_else(|| CapabilityQueryError::Protocol("unknown remote".into()))?;
        match remote.behaviour {
            Behaviour::Respond => Ok(remote.metadata),
            Behaviour::Hang => futures::future::pending().await,
            Behaviour::Reject | Behaviour::Unreachable => {
                Err(CapabilityQueryError::Protocol("stream reset".into()))
            }
        }
    }
}
