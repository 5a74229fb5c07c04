//! Discovery adapter: resolves subnet candidates from cached peer records.
//!
//! Records come from a DHT and are untrusted. Every record goes through
//! `classify`, which either yields a dialable candidate or a skip reason.
//! A bad record never fails the query; it is logged and skipped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use meridian_core::{PeerId, PeerRecord, RecordInterest, SubnetId};

/// The distributed record store. Only snapshot access is needed.
pub trait RecordService: Send + Sync {
    /// Records currently cached by the service.
    fn cached_records(&self) -> Vec<PeerRecord>;

    /// Announce our own record (addresses and subnet interest).
    fn publish_local(&self, record: PeerRecord);
}

/// Why a record or candidate was not used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Record has no attnets key.
    NotAdvertised,
    /// Record or payload does not set the subnet bit.
    NoInterest,
    /// Attnets bytes failed to decode.
    Malformed,
    /// Record carries no address to dial.
    NoAddress,
    /// Capability query exceeded its deadline.
    Timeout,
    /// Capability query failed at the protocol level.
    ProtocolError,
    /// Reputation below the admission threshold.
    LowScore,
}

/// Outcome of inspecting one record for one subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Candidate(SocketAddr),
    Skip(SkipReason),
}

/// Decide whether `record` is a candidate for `subnet`.
pub fn classify(record: &PeerRecord, subnet: SubnetId) -> Verdict {
    let interest = match record.decode() {
        Ok(interest) => interest,
        Err(e) => {
            tracing::debug!(peer = %record.peer_id.short(), error = %e, "skipping malformed record");
            return Verdict::Skip(SkipReason::Malformed);
        }
    };
    match interest {
        RecordInterest::NotAdvertised => Verdict::Skip(SkipReason::NotAdvertised),
        RecordInterest::Subnets(bits) if !bits.get(subnet) => Verdict::Skip(SkipReason::NoInterest),
        RecordInterest::Subnets(_) => match record.best_addr() {
            Some(addr) => Verdict::Candidate(addr),
            None => Verdict::Skip(SkipReason::NoAddress),
        },
    }
}

#[derive(Clone)]
pub struct DiscoveryAdapter {
    records: Arc<dyn RecordService>,
}

impl DiscoveryAdapter {
    pub fn new(records: Arc<dyn RecordService>) -> Self {
        Self { records }
    }

    /// Snapshot query: peers whose newest record claims `subnet`.
    pub fn find_peers_for_subnet(&self, subnet: SubnetId) -> Vec<(PeerId, SocketAddr)> {
        // Keep only the newest record per peer.
        let mut newest: HashMap<PeerId, PeerRecord> = HashMap::new();
        for record in self.records.cached_records() {
            match newest.get(&record.peer_id) {
                Some(existing) if !record.supersedes(existing) => {}
                _ => {
                    newest.insert(record.peer_id, record);
                }
            }
        }

        let mut found: Vec<_> = newest
            .values()
            .filter_map(|record| match classify(record, subnet) {
                Verdict::Candidate(addr) => Some((record.peer_id, addr)),
                Verdict::Skip(_) => None,
            })
            .collect();
        found.sort_by_key(|(id, _)| *id);

        tracing::debug!(%subnet, records = newest.len(), candidates = found.len(), "discovery query");
        found
    }

    pub fn publish_local(&self, record: PeerRecord) {
        self.records.publish_local(record);
    }
}
