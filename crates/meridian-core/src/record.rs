//! Per-peer protocol payloads and discovery records.
//!
//! `Status`, `Metadata` and `Encoding` are what the request/response layer
//! negotiates with a connected peer. `PeerRecord` is what the discovery
//! service caches about peers we may not be connected to. Records are
//! untrusted: the attnets field stays raw until `decode()` is called.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::peer::PeerId;
use crate::subnet::AttestationSubnets;

/// Chain-status handshake payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub fork_digest: [u8; 4],
    pub finalized_root: [u8; 32],
    pub finalized_epoch: u64,
    pub head_root: [u8; 32],
    pub head_slot: u64,
}

/// Capability payload: what a peer says about itself when asked directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub seq_number: u64,
    pub attnets: AttestationSubnets,
}

/// Negotiated message encoding for the request/response protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Ssz,
    SszSnappy,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordDecodeError {
    #[error("attnets field has {actual} bytes, expected {expected}")]
    InvalidLength { expected: usize, actual: usize },
}

/// What a decoded record says about subnet interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordInterest {
    Subnets(AttestationSubnets),
    /// The record carries no attnets key at all.
    NotAdvertised,
}

/// A self-described peer announcement as cached by the discovery service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    /// Monotonic per peer. A higher value supersedes older records.
    pub seq: u64,
    /// Raw SSZ attnets bytes, exactly as announced.
    pub attnets: Option<Vec<u8>>,
    pub addrs: Vec<SocketAddr>,
}

impl PeerRecord {
    pub fn decode(&self) -> Result<RecordInterest, RecordDecodeError> {
        match &self.attnets {
            None => Ok(RecordInterest::NotAdvertised),
            Some(raw) => AttestationSubnets::from_ssz_bytes(raw).map(RecordInterest::Subnets),
        }
    }

    /// The address we would dial first.
    pub fn best_addr(&self) -> Option<SocketAddr> {
        self.addrs.first().copied()
    }

    /// Does this record supersede `other` for the same peer?
    pub fn supersedes(&self, other: &PeerRecord) -> bool {
        self.peer_id == other.peer_id && self.seq > other.seq
    }
}
