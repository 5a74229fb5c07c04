//! Normalized peer events emitted by the facade.

use meridian_core::{Direction, PeerId};

/// One event per peer transition, not per transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    PeerConnect { peer: PeerId, direction: Direction },
    PeerDisconnect { peer: PeerId },
}

impl NetworkEvent {
    pub fn peer(&self) -> &PeerId {
        match self {
            NetworkEvent::PeerConnect { peer, .. } | NetworkEvent::PeerDisconnect { peer } => peer,
        }
    }
}
