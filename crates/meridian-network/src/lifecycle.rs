//! Per-peer connection lifecycle as observed by the facade.
//!
//! ```text
//! unknown ─discovered─▶ discovered ─dialing─▶ connecting ─connected─▶ connected
//!                                                 │                      │
//!                                            dial failed               closed
//!                                                 ▼                      ▼
//!                                            disconnected ◀──────────────┘
//! ```
//!
//! Inbound sessions jump straight to `connected`. Events that make no sense
//! in the current state are ignored.

use dashmap::DashMap;
use serde::Serialize;

use meridian_core::PeerId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    #[default]
    Unknown,
    Discovered,
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Discovered,
    Dialing,
    Connected,
    DialFailed,
    Closed,
}

/// The transition table. `None` means the event is ignored.
pub fn transition(from: PeerState, event: LifecycleEvent) -> Option<PeerState> {
    use LifecycleEvent as E;
    use PeerState::*;

    match (from, event) {
        (Unknown, E::Discovered) => Some(Discovered),
        (Unknown | Discovered | Disconnected, E::Dialing) => Some(Connecting),
        (Unknown | Discovered | Connecting | Disconnected, E::Connected) => Some(Connected),
        (Connecting, E::DialFailed) => Some(Disconnected),
        (Connected, E::Closed) => Some(Disconnected),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Tracked {
    state: PeerState,
    ever_connected: bool,
}

#[derive(Debug, Default)]
pub struct PeerLifecycle {
    peers: DashMap<PeerId, Tracked>,
}

impl PeerLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, peer: &PeerId) -> PeerState {
        self.peers.get(peer).map(|t| t.state).unwrap_or_default()
    }

    /// Has this peer ever reached `connected`?
    pub fn ever_connected(&self, peer: &PeerId) -> bool {
        self.peers.get(peer).map(|t| t.ever_connected).unwrap_or(false)
    }

    /// Apply an event. Returns the new state if the event was accepted.
    pub fn apply(&self, peer: &PeerId, event: LifecycleEvent) -> Option<PeerState> {
        let mut tracked = self.peers.entry(*peer).or_default();
        match transition(tracked.state, event) {
            Some(next) => {
                tracked.state = next;
                tracked.ever_connected |= next == PeerState::Connected;
                Some(next)
            }
            None => {
                tracing::debug!(peer = %peer.short(), from = ?tracked.state, ?event, "lifecycle event ignored");
                None
            }
        }
    }

    pub fn forget(&self, peer: &PeerId) {
        self.peers.remove(peer);
    }

    pub fn count(&self, state: PeerState) -> usize {
        self.peers.iter().filter(|t| t.state == state).count()
    }
}
