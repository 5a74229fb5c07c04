//! In-process collaborators. The simulator and the tests run the facade on
//! top of these instead of a real network stack.

mod records;
mod reqresp;
mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use meridian_core::PeerId;

pub use records::{MemoryRecordService, NoopGossip};
pub use reqresp::MemoryReqResp;
pub use transport::{Behaviour, MemoryTransport, SimPeer};

use crate::network::NetworkDeps;

/// One of each memory collaborator, wired together.
#[derive(Clone)]
pub struct MemoryStack {
    pub transport: Arc<MemoryTransport>,
    pub reqresp: Arc<MemoryReqResp>,
    pub gossip: Arc<NoopGossip>,
    pub records: Arc<MemoryRecordService>,
}

impl MemoryStack {
    pub fn new(listen: Vec<SocketAddr>) -> Self {
        let transport = Arc::new(MemoryTransport::new(listen));
        Self {
            reqresp: Arc::new(MemoryReqResp::new(transport.clone())),
            transport,
            gossip: Arc::new(NoopGossip::new()),
            records: Arc::new(MemoryRecordService::new()),
        }
    }

    pub fn deps(&self, local_id: PeerId) -> NetworkDeps {
        NetworkDeps {
            local_id,
            transport: self.transport.clone(),
            reqresp: self.reqresp.clone(),
            gossip: self.gossip.clone(),
            records: self.records.clone(),
        }
    }
}
