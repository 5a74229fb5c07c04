use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use meridian_core::{PeerId, PeerRecord};
use meridian_peers::{Gossip, RecordService};

/// Fixed record cache. Tests and the simulator fill it with `insert`.
#[derive(Default)]
pub struct MemoryRecordService {
    records: Mutex<Vec<PeerRecord>>,
    local: Mutex<Option<PeerRecord>>,
    queries: AtomicUsize,
}

impl MemoryRecordService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the record for `record.peer_id`.
    pub fn insert(&self, record: PeerRecord) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.retain(|r| r.peer_id != record.peer_id);
        records.push(record);
    }

    pub fn remove(&self, peer: &PeerId) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.retain(|r| r.peer_id != *peer);
    }

    /// Last record published for the local node.
    pub fn local_record(&self) -> Option<PeerRecord> {
        self.local
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl RecordService for MemoryRecordService {
    fn cached_records(&self) -> Vec<PeerRecord> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish_local(&self, record: PeerRecord) {
        *self.local.lock().unwrap_or_else(PoisonError::into_inner) = Some(record);
    }
}

/// Gossip is out of scope here; this only tracks start/stop.
#[derive(Debug, Default)]
pub struct NoopGossip {
    started: AtomicBool,
}

impl NoopGossip {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Gossip for NoopGossip {
    async fn start(&self) -> anyhow::Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }
}
