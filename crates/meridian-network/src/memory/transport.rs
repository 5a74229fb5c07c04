use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use meridian_core::{Direction, Metadata, PeerId, SessionId};
use meridian_peers::{ConnectionInfo, DialError, HangUpError, PeerInfo, Transport, TransportEvent};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// How a simulated remote reacts to dials and capability queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Accepts dials and answers queries.
    Respond,
    /// Accepts dials, never answers.
    Hang,
    /// Accepts dials, resets the query stream.
    Reject,
    /// Cannot be dialed at all.
    Unreachable,
}

/// A remote node living inside the memory transport.
#[derive(Debug, Clone)]
pub struct SimPeer {
    pub metadata: Metadata,
    pub behaviour: Behaviour,
    pub protocols: Vec<String>,
    pub addr: SocketAddr,
}

/// In-process transport. Peers are registered up front with `add_remote`;
/// sessions open on `dial` or `accept_inbound`.
pub struct MemoryTransport {
    listen: Vec<SocketAddr>,
    directory: DashMap<PeerId, PeerInfo>,
    remotes: DashMap<PeerId, SimPeer>,
    sessions: DashMap<PeerId, Vec<ConnectionInfo>>,
    next_session: AtomicU64,
    events: broadcast::Sender<TransportEvent>,
    running: AtomicBool,
    fail_start: AtomicBool,
    dials: AtomicUsize,
}

impl MemoryTransport {
    pub fn new(listen: Vec<SocketAddr>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            listen,
            directory: DashMap::new(),
            remotes: DashMap::new(),
            sessions: DashMap::new(),
            next_session: AtomicU64::new(1),
            events,
            running: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            dials: AtomicUsize::new(0),
        }
    }

    /// Register a remote. It is not in the directory until someone learns
    /// its address.
    pub fn add_remote(&self, peer: PeerId, remote: SimPeer) {
        self.remotes.insert(peer, remote);
    }

    pub fn remote(&self, peer: &PeerId) -> Option<SimPeer> {
        self.remotes.get(peer).map(|r| r.clone())
    }

    pub fn set_behaviour(&self, peer: &PeerId, behaviour: Behaviour) {
        if let Some(mut remote) = self.remotes.get_mut(peer) {
            remote.behaviour = behaviour;
        }
    }

    /// Make the next `start` fail.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// A remote dials us.
    pub fn accept_inbound(&self, peer: PeerId) -> SessionId {
        if let Some(remote) = self.remote(&peer) {
            self.learn(&peer, &[remote.addr], &remote.protocols);
        }
        self.open_session(peer, Direction::Inbound)
    }

    /// Close one session, as if the remote dropped it.
    pub fn close_session(&self, peer: &PeerId, session: SessionId) -> bool {
        let removed = match self.sessions.get_mut(peer) {
            Some(mut open) => {
                let before = open.len();
                open.retain(|c| c.session != session);
                before != open.len()
            }
            None => false,
        };
        if removed {
            self.sessions.remove_if(peer, |_, open| open.is_empty());
            let _ = self.events.send(TransportEvent::Disconnected { peer: *peer, session });
        }
        removed
    }

    /// Push a raw notification, bypassing session bookkeeping.
    pub fn inject(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn session_count(&self, peer: &PeerId) -> usize {
        self.sessions.get(peer).map(|s| s.len()).unwrap_or(0)
    }

    fn learn(&self, peer: &PeerId, addrs: &[SocketAddr], protocols: &[String]) {
        let mut info = self.directory.entry(*peer).or_default();
        for addr in addrs {
            if !info.addrs.contains(addr) {
                info.addrs.push(*addr);
            }
        }
        for proto in protocols {
            if !info.protocols.contains(proto) {
                info.protocols.push(proto.clone());
            }
        }
    }

    fn open_session(&self, peer: PeerId, direction: Direction) -> SessionId {
        let session = SessionId(self.next_session.fetch_add(1, Ordering::SeqCst));
        self.sessions.entry(peer).or_default().push(ConnectionInfo {
            session,
            direction,
            open: true,
        });
        let _ = self.events.send(TransportEvent::Connected {
            peer,
            direction,
            session,
        });
        session
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn start(&self) -> anyhow::Result<Vec<SocketAddr>> {
        if self.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("failed to bind {:?}", self.listen);
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(self.listen.clone())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.sessions.clear();
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn dial(&self, peer: &PeerId) -> Result<(), DialError> {
        if !self.is_running() {
            return Err(DialError::Refused("transport stopped".into()));
        }
        if self.session_count(peer) > 0 {
            return Ok(());
        }
        self.dials.fetch_add(1, Ordering::SeqCst);

        let has_addr = self
            .directory
            .get(peer)
            .map(|info| !info.addrs.is_empty())
            .unwrap_or(false);
        if !has_addr {
            return Err(DialError::NoAddress);
        }
        let remote = self.remote(peer).ok_or(DialError::Unreachable)?;
        if remote.behaviour == Behaviour::Unreachable {
            return Err(DialError::Unreachable);
        }

        self.learn(peer, &[], &remote.protocols);
        self.open_session(*peer, Direction::Outbound);
        Ok(())
    }

    async fn hang_up(&self, peer: &PeerId) -> Result<(), HangUpError> {
        if !self.is_running() {
            return Err(HangUpError("transport stopped".into()));
        }
        let Some((_, open)) = self.sessions.remove(peer) else {
            return Ok(());
        };
        for conn in open {
            let _ = self.events.send(TransportEvent::Disconnected {
                peer: *peer,
                session: conn.session,
            });
        }
        Ok(())
    }

    fn add_addresses(&self, peer: &PeerId, addrs: &[SocketAddr]) {
        self.learn(peer, addrs, &[]);
    }

    fn peers(&self) -> Vec<(PeerId, PeerInfo)> {
        let mut peers: Vec<_> = self
            .directory
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        peers.sort_by(|a, b| a.0.cmp(&b.0));
        peers
    }

    fn peer(&self, peer: &PeerId) -> Option<PeerInfo> {
        self.directory.get(peer).map(|info| info.clone())
    }

    fn connection(&self, peer: &PeerId) -> Option<ConnectionInfo> {
        self.sessions.get(peer).and_then(|open| open.first().copied())
    }

    fn local_addrs(&self) -> Vec<SocketAddr> {
        if self.is_running() {
            self.listen.clone()
        } else {
            Vec::new()
        }
    }
}
