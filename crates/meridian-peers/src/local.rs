//! Our own capability payload, served to peers and published in our record.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use meridian_core::{AttestationSubnets, Metadata, PeerId, PeerRecord, SubnetId};

#[derive(Debug, Clone, Default)]
pub struct LocalMetadata {
    inner: Arc<Mutex<Metadata>>,
}

impl LocalMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(&self) -> Metadata {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the advertised subnets. The sequence number only moves when
    /// the bitfield actually changes. Returns true if it changed.
    pub fn set_subnets(&self, attnets: AttestationSubnets) -> bool {
        self.modify(|bits| *bits = attnets)
    }

    /// Add or remove one subnet. Returns true if the bitfield changed.
    pub fn set_subnet(&self, subnet: SubnetId, serving: bool) -> bool {
        self.modify(|bits| bits.set(subnet, serving))
    }

    fn modify(&self, f: impl FnOnce(&mut AttestationSubnets)) -> bool {
        let mut meta = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut attnets = meta.attnets;
        f(&mut attnets);
        if meta.attnets == attnets {
            return false;
        }
        meta.attnets = attnets;
        meta.seq_number += 1;
        tracing::debug!(seq = meta.seq_number, subnets = attnets.count(), "local metadata updated");
        true
    }

    /// The record we publish through discovery.
    pub fn local_record(&self, peer_id: PeerId, addrs: Vec<SocketAddr>) -> PeerRecord {
        let meta = self.metadata();
        PeerRecord {
            peer_id,
            seq: meta.seq_number,
            attnets: Some(meta.attnets.to_ssz_bytes().to_vec()),
            addrs,
        }
    }
}
