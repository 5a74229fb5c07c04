//! meridian-network — the peer overlay facade.
//!
//! Starts and stops the collaborators in order, normalizes transport
//! sessions into peer connect/disconnect events and keeps subscribed
//! subnets peered.

pub mod error;
pub mod event;
pub mod lifecycle;
pub mod memory;
pub mod network;

pub use error::NetworkError;
pub use event::NetworkEvent;
pub use lifecycle::{LifecycleEvent, PeerLifecycle, PeerState};
pub use network::{Network, NetworkDeps, PeerFilter};
