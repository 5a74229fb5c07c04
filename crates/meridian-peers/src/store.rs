//! Peer metadata store — what we know about each peer, keyed by identity.
//!
//! Four independently nullable fields per peer: chain status, capability
//! metadata, negotiated encoding and reputation score. Entries are created
//! lazily by the first `Some` write and survive disconnects; only
//! `forget()` removes one.
//!
//! The map is a DashMap, so each write locks a single entry and readers
//! never block each other. There is no cross-call atomicity: a caller that
//! needs read-modify-write must use a combined operation such as
//! `update_score`.

use std::sync::Arc;

use dashmap::DashMap;

use meridian_core::{Encoding, Metadata, PeerId, Status, SubnetId};

/// Per-peer record. Every field is optional and independent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataEntry {
    pub status: Option<Status>,
    pub metadata: Option<Metadata>,
    pub encoding: Option<Encoding>,
    pub score: Option<i64>,
}

/// Shared handle to the process-wide metadata map. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct PeerMetadataStore {
    entries: Arc<DashMap<PeerId, MetadataEntry>>,
}

impl PeerMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    // `None` on an unknown peer must not create an entry; `Some` does.
    fn write<F>(&self, peer: &PeerId, clearing: bool, f: F)
    where
        F: FnOnce(&mut MetadataEntry),
    {
        if clearing {
            if let Some(mut entry) = self.entries.get_mut(peer) {
                f(entry.value_mut());
            }
        } else {
            f(self.entries.entry(*peer).or_default().value_mut());
        }
    }

    fn read<T>(&self, peer: &PeerId, f: impl FnOnce(&MetadataEntry) -> Option<T>) -> Option<T> {
        self.entries.get(peer).and_then(|e| f(e.value()))
    }

    pub fn set_status(&self, peer: &PeerId, status: Option<Status>) {
        let clearing = status.is_none();
        self.write(peer, clearing, |e| e.status = status);
    }

    pub fn status(&self, peer: &PeerId) -> Option<Status> {
        self.read(peer, |e| e.status.clone())
    }

    pub fn set_metadata(&self, peer: &PeerId, metadata: Option<Metadata>) {
        self.write(peer, metadata.is_none(), |e| e.metadata = metadata);
    }

    pub fn metadata(&self, peer: &PeerId) -> Option<Metadata> {
        self.read(peer, |e| e.metadata)
    }

    pub fn set_encoding(&self, peer: &PeerId, encoding: Option<Encoding>) {
        self.write(peer, encoding.is_none(), |e| e.encoding = encoding);
    }

    pub fn encoding(&self, peer: &PeerId) -> Option<Encoding> {
        self.read(peer, |e| e.encoding)
    }

    /// Raw score field. `None` means neutral; use `ScoreTracker::current_score`
    /// for the defaulted value.
    pub fn score(&self, peer: &PeerId) -> Option<i64> {
        self.read(peer, |e| e.score)
    }

    /// Read-modify-write of the score under the entry lock. Only the score
    /// tracker writes scores.
    /// `f` receives the current score (0 when absent) and returns the new one.
    pub(crate) fn update_score(&self, peer: &PeerId, f: impl FnOnce(i64) -> i64) -> i64 {
        let mut entry = self.entries.entry(*peer).or_default();
        let next = f(entry.score.unwrap_or(0));
        entry.score = Some(next);
        next
    }

    /// Full snapshot of one peer's entry.
    pub fn entry(&self, peer: &PeerId) -> Option<MetadataEntry> {
        self.entries.get(peer).map(|e| e.value().clone())
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.entries.contains_key(peer)
    }

    /// Drop what the peer told us (status, metadata, encoding) but keep its
    /// score. The entry goes away only if no score is left on it.
    pub fn clear_observations(&self, peer: &PeerId) {
        if let Some(mut entry) = self.entries.get_mut(peer) {
            entry.status = None;
            entry.metadata = None;
            entry.encoding = None;
        }
        self.entries.remove_if(peer, |_, e| e.score.is_none());
    }

    /// Remove everything known about a peer.
    /// Callers must make sure the peer has no open connection.
    pub fn forget(&self, peer: &PeerId) -> Option<MetadataEntry> {
        self.entries.remove(peer).map(|(_, e)| e)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    /// The subset of `peers` whose last capability payload sets `subnet`.
    pub fn peers_with_subnet(&self, peers: &[PeerId], subnet: SubnetId) -> Vec<PeerId> {
        peers
            .iter()
            .filter(|p| {
                self.metadata(p)
                    .map(|m| m.attnets.get(subnet))
                    .unwrap_or(false)
            })
            .copied()
            .collect()
    }
}
