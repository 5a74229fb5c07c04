//! Peer reputation.
//!
//! Scores live in the metadata store but only this tracker writes them.
//! Each observed outcome moves the score by a configured delta and the
//! result is clamped to `[min, max]`. Config validation guarantees no single
//! delta can move a neutral peer to either bound.

use meridian_core::config::ScoringConfig;
use meridian_core::PeerId;

use crate::store::PeerMetadataStore;

/// Something a peer did that affects its reputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    ServedValidBlock,
    ServedInvalidBlock,
    Timeout,
    ProtocolViolation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreParams {
    pub min: i64,
    pub max: i64,
    pub disconnect_threshold: i64,
    pub valid_block: i64,
    pub invalid_block: i64,
    pub timeout: i64,
    pub protocol_violation: i64,
}

impl From<&ScoringConfig> for ScoreParams {
    fn from(c: &ScoringConfig) -> Self {
        Self {
            min: c.min,
            max: c.max,
            disconnect_threshold: c.disconnect_threshold,
            valid_block: c.valid_block,
            invalid_block: c.invalid_block,
            timeout: c.timeout,
            protocol_violation: c.protocol_violation,
        }
    }
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self::from(&ScoringConfig::default())
    }
}

impl ScoreParams {
    fn delta(&self, outcome: Outcome) -> i64 {
        match outcome {
            Outcome::ServedValidBlock => self.valid_block,
            Outcome::ServedInvalidBlock => self.invalid_block,
            Outcome::Timeout => self.timeout,
            Outcome::ProtocolViolation => self.protocol_violation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoreTracker {
    store: PeerMetadataStore,
    params: ScoreParams,
}

impl ScoreTracker {
    pub fn new(store: PeerMetadataStore, params: ScoreParams) -> Self {
        Self { store, params }
    }

    /// Apply an outcome and return the new score.
    pub fn record_outcome(&self, peer: &PeerId, outcome: Outcome) -> i64 {
        let ScoreParams { min, max, .. } = self.params;
        let delta = self.params.delta(outcome);
        let score = self
            .store
            .update_score(peer, |current| current.saturating_add(delta).clamp(min, max));
        tracing::debug!(peer = %peer.short(), ?outcome, delta, score, "peer score updated");
        score
    }

    /// Current score, neutral (0) when nothing has been recorded.
    pub fn current_score(&self, peer: &PeerId) -> i64 {
        self.store.score(peer).unwrap_or(0)
    }

    /// Admission policy: a peer at or below the threshold should not be
    /// dialed and should be dropped if connected.
    pub fn should_disconnect(&self, peer: &PeerId) -> bool {
        self.current_score(peer) <= self.params.disconnect_threshold
    }

    pub fn params(&self) -> &ScoreParams {
        &self.params
    }

    /// Known peers ordered from lowest to highest score, for cleanup tasks.
    pub fn ranked(&self) -> Vec<(PeerId, i64)> {
        let mut ranked: Vec<_> = self
            .store
            .peers()
            .into_iter()
            .map(|p| (p, self.current_score(&p)))
            .collect();
        ranked.sort_by_key(|(_, s)| *s);
        ranked
    }
}
