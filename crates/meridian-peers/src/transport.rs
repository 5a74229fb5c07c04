//! Transport connection manager interface.
//!
//! The overlay never touches sockets itself. It consumes a transport that
//! dials, hangs up, keeps a directory of known peers and reports session
//! open/close through a broadcast channel.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::sync::broadcast;

use meridian_core::{Direction, PeerId, SessionId};

/// Raw session notifications, one per transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected {
        peer: PeerId,
        direction: Direction,
        session: SessionId,
    },
    Disconnected {
        peer: PeerId,
        session: SessionId,
    },
}

/// What the transport's directory knows about a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerInfo {
    pub addrs: Vec<SocketAddr>,
    pub protocols: Vec<String>,
}

/// An open session as seen by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub session: SessionId,
    pub direction: Direction,
    pub open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DialError {
    #[error("no known address")]
    NoAddress,
    #[error("peer unreachable")]
    Unreachable,
    #[error("dial refused: {0}")]
    Refused(String),
    #[error("dial timed out")]
    Timeout,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("hang-up failed: {0}")]
pub struct HangUpError(pub String);

#[async_trait]
pub trait Transport: Send + Sync {
    /// Start listening. Returns the addresses actually bound.
    async fn start(&self) -> anyhow::Result<Vec<SocketAddr>>;

    async fn stop(&self);

    /// Register for session notifications. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Establish a session. Bounded by the transport's own dial timeout.
    async fn dial(&self, peer: &PeerId) -> Result<(), DialError>;

    async fn hang_up(&self, peer: &PeerId) -> Result<(), HangUpError>;

    /// Merge address hints into the directory entry for `peer`.
    fn add_addresses(&self, peer: &PeerId, addrs: &[SocketAddr]);

    /// Snapshot of the peer directory.
    fn peers(&self) -> Vec<(PeerId, PeerInfo)>;

    fn peer(&self, peer: &PeerId) -> Option<PeerInfo>;

    fn connection(&self, peer: &PeerId) -> Option<ConnectionInfo>;

    fn local_addrs(&self) -> Vec<SocketAddr>;
}
