//! Network facade. Owns the transport subscription and peer bookkeeping.
//!
//! Start order: subscribe → transport → req/resp → gossip → publish record.
//! Stop cancels every task the facade owns, then tears down in reverse.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use meridian_core::config::MeridianConfig;
use meridian_core::{AttestationSubnets, Direction, Metadata, PeerId, SessionId, SubnetId};
use meridian_peers::{
    ConnectionInfo, DiscoveryAdapter, Gossip, LocalMetadata, PeerMetadataStore, RecordService,
    ReqResp, ScoreParams, ScoreTracker, SearchParams, SubnetPeerSearch, Transport, TransportEvent,
};

use crate::error::NetworkError;
use crate::event::NetworkEvent;
use crate::lifecycle::{LifecycleEvent, PeerLifecycle, PeerState};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Collaborators the facade drives. Each is shared by reference with the
/// subcomponents that need it; none is duplicated.
pub struct NetworkDeps {
    pub local_id: PeerId,
    pub transport: Arc<dyn Transport>,
    pub reqresp: Arc<dyn ReqResp>,
    pub gossip: Arc<dyn Gossip>,
    pub records: Arc<dyn RecordService>,
}

/// Predicates for `Network::peers`. The default matches every known peer.
#[derive(Debug, Clone, Default)]
pub struct PeerFilter {
    pub connected: bool,
    pub supports_protocols: Vec<String>,
}

impl PeerFilter {
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Default::default()
        }
    }
}

struct Running {
    tasks: JoinSet<()>,
}

struct Inner {
    local_id: PeerId,
    transport: Arc<dyn Transport>,
    reqresp: Arc<dyn ReqResp>,
    gossip: Arc<dyn Gossip>,
    discovery: DiscoveryAdapter,
    store: PeerMetadataStore,
    scores: ScoreTracker,
    search: SubnetPeerSearch,
    local: LocalMetadata,
    subnets: DashSet<SubnetId>,
    lifecycle: PeerLifecycle,
    /// Open transport sessions per peer.
    sessions: DashMap<PeerId, HashSet<SessionId>>,
    connected: AtomicUsize,
    events: broadcast::Sender<NetworkEvent>,
    active: watch::Sender<bool>,
    running: Mutex<Option<Running>>,
    maintenance_interval: Duration,
}

/// Cheap to clone; all clones drive the same network.
#[derive(Clone)]
pub struct Network {
    inner: Arc<Inner>,
}

impl Network {
    pub fn new(deps: NetworkDeps, config: &MeridianConfig) -> Self {
        let store = PeerMetadataStore::new();
        let scores = ScoreTracker::new(store.clone(), ScoreParams::from(&config.scoring));
        let discovery = DiscoveryAdapter::new(deps.records);
        let search = SubnetPeerSearch::new(
            store.clone(),
            scores.clone(),
            discovery.clone(),
            deps.transport.clone(),
            deps.reqresp.clone(),
            SearchParams::from(&config.subnets),
        );

        let configured = config.network.subnets();
        let local = LocalMetadata::new();
        local.set_subnets(AttestationSubnets::from_subnets(configured.iter().copied()));
        let subnets: DashSet<SubnetId> = configured.into_iter().collect();

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (active, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                local_id: deps.local_id,
                transport: deps.transport,
                reqresp: deps.reqresp,
                gossip: deps.gossip,
                discovery,
                store,
                scores,
                search,
                local,
                subnets,
                lifecycle: PeerLifecycle::new(),
                sessions: DashMap::new(),
                connected: AtomicUsize::new(0),
                events,
                active,
                running: Mutex::new(None),
                // interval() panics on zero
                maintenance_interval: config
                    .network
                    .maintenance_interval()
                    .max(Duration::from_secs(1)),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    pub async fn start(&self) -> Result<(), NetworkError> {
        let inner = &self.inner;
        let mut running = inner.running.lock().await;
        if running.is_some() {
            return Err(NetworkError::AlreadyStarted);
        }

        // Subscribe first so sessions opened during startup are not missed.
        let transport_events = inner.transport.subscribe();

        let listen = inner
            .transport
            .start()
            .await
            .map_err(|e| NetworkError::Startup(e.context("transport")))?;

        if let Err(e) = inner.reqresp.start().await {
            inner.transport.stop().await;
            return Err(NetworkError::Startup(e.context("req/resp")));
        }
        if let Err(e) = inner.gossip.start().await {
            inner.reqresp.stop().await;
            inner.transport.stop().await;
            return Err(NetworkError::Startup(e.context("gossip")));
        }

        inner.publish_local_record(listen.clone());
        inner.active.send_replace(true);

        let mut tasks = JoinSet::new();
        tasks.spawn(event_loop(inner.clone(), transport_events));
        tasks.spawn(maintenance_loop(inner.clone()));
        *running = Some(Running { tasks });

        tracing::info!(
            peer_id = %inner.local_id,
            addrs = ?listen,
            subnets = inner.subnets.len(),
            "network started"
        );
        Ok(())
    }

    /// Idempotent. Cancels owned tasks, then tears down gossip, req/resp
    /// and the transport in that order.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let Some(mut running) = inner.running.lock().await.take() else {
            return;
        };
        inner.active.send_replace(false);

        // Aborting the event loop also drops the transport subscription.
        running.tasks.shutdown().await;

        inner.gossip.stop().await;
        inner.reqresp.stop().await;
        inner.transport.stop().await;

        inner.close_all_sessions();
        tracing::info!(peer_id = %inner.local_id, "network stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.inner.active.borrow()
    }

    /// Normalized connect/disconnect events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.inner.events.subscribe()
    }

    // ── Peers ────────────────────────────────────────────────────────────────

    /// Snapshot of the transport's peer directory matching `filter`.
    pub fn peers(&self, filter: &PeerFilter) -> Vec<PeerId> {
        self.inner.peers(filter)
    }

    pub fn has_peer(&self, peer: &PeerId, require_connected: bool) -> bool {
        if self.inner.transport.peer(peer).is_none() {
            return false;
        }
        !require_connected || self.inner.is_connected(peer)
    }

    pub fn connection(&self, peer: &PeerId) -> Option<ConnectionInfo> {
        self.inner.transport.connection(peer)
    }

    pub fn connected_peer_count(&self) -> usize {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn peer_state(&self, peer: &PeerId) -> PeerState {
        self.inner.lifecycle.state(peer)
    }

    /// Number of tracked peers currently in `state`.
    pub fn peers_in_state(&self, state: PeerState) -> usize {
        self.inner.lifecycle.count(state)
    }

    /// Dial a peer, recording `hints` first. No retries here.
    pub async fn connect(&self, peer: &PeerId, hints: &[SocketAddr]) -> Result<(), NetworkError> {
        let inner = &self.inner;
        if !self.is_running() {
            return Err(NetworkError::NotStarted);
        }
        if !hints.is_empty() {
            inner.transport.add_addresses(peer, hints);
        }
        inner.lifecycle.apply(peer, LifecycleEvent::Dialing);

        match inner.transport.dial(peer).await {
            Ok(()) => {
                tracing::debug!(peer = %peer.short(), "dial succeeded");
                Ok(())
            }
            Err(source) => {
                inner.lifecycle.apply(peer, LifecycleEvent::DialFailed);
                if !inner.lifecycle.ever_connected(peer) && !inner.is_connected(peer) {
                    inner.store.clear_observations(peer);
                }
                tracing::warn!(peer = %peer.short(), error = %source, "dial failed");
                Err(NetworkError::Dial {
                    peer: *peer,
                    source,
                })
            }
        }
    }

    /// Best effort: teardown failures are logged, never returned.
    pub async fn disconnect(&self, peer: &PeerId) {
        if let Err(e) = self.inner.transport.hang_up(peer).await {
            tracing::warn!(peer = %peer.short(), reason = %e, "unclean disconnect");
        }
    }

    /// Forget everything stored about a peer that is not connected.
    /// Returns false (and keeps the entry) while a session is open.
    pub fn prune_peer(&self, peer: &PeerId) -> bool {
        let inner = &self.inner;
        if inner.sessions.contains_key(peer) || inner.is_connected(peer) {
            return false;
        }
        inner.store.forget(peer);
        inner.lifecycle.forget(peer);
        true
    }

    // ── Subnets ──────────────────────────────────────────────────────────────

    /// Backfill `subnet` if fewer than the target number of connected peers
    /// serve it. Returns how many new peers confirmed the subnet.
    pub async fn search_subnet_peers(&self, subnet: SubnetId) -> usize {
        let mut active = self.inner.active.subscribe();
        if !*active.borrow_and_update() {
            tracing::debug!(%subnet, "network not running, skipping subnet search");
            return 0;
        }
        tokio::select! {
            found = self.inner.search_subnet(subnet) => found,
            _ = active.wait_for(|running| !*running) => {
                tracing::debug!(%subnet, "subnet search cancelled by shutdown");
                0
            }
        }
    }

    /// Keep `subnet` peered and advertise it in our metadata.
    pub fn subscribe_subnet(&self, subnet: SubnetId) {
        let inner = &self.inner;
        inner.subnets.insert(subnet);
        if inner.local.set_subnet(subnet, true) && self.is_running() {
            inner.publish_local_record(inner.transport.local_addrs());
        }
    }

    pub fn unsubscribe_subnet(&self, subnet: SubnetId) {
        let inner = &self.inner;
        inner.subnets.remove(&subnet);
        if inner.local.set_subnet(subnet, false) && self.is_running() {
            inner.publish_local_record(inner.transport.local_addrs());
        }
    }

    pub fn subnets(&self) -> Vec<SubnetId> {
        let mut subnets: Vec<_> = self.inner.subnets.iter().map(|s| *s).collect();
        subnets.sort();
        subnets
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn local_id(&self) -> PeerId {
        self.inner.local_id
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.inner.transport.local_addrs()
    }

    pub fn local_metadata(&self) -> Metadata {
        self.inner.local.metadata()
    }

    /// Shared metadata store for protocol handlers.
    pub fn store(&self) -> &PeerMetadataStore {
        &self.inner.store
    }

    pub fn scores(&self) -> &ScoreTracker {
        &self.inner.scores
    }
}

impl Inner {
    fn is_connected(&self, peer: &PeerId) -> bool {
        self.transport
            .connection(peer)
            .map(|c| c.open)
            .unwrap_or(false)
    }

    fn peers(&self, filter: &PeerFilter) -> Vec<PeerId> {
        self.transport
            .peers()
            .into_iter()
            .filter(|(id, info)| {
                if filter.connected && !self.is_connected(id) {
                    return false;
                }
                filter
                    .supports_protocols
                    .iter()
                    .all(|p| info.protocols.contains(p))
            })
            .map(|(id, _)| id)
            .collect()
    }

    fn publish_local_record(&self, addrs: Vec<SocketAddr>) {
        let record = self.local.local_record(self.local_id, addrs);
        tracing::debug!(seq = record.seq, addrs = ?record.addrs, "publishing local record");
        self.discovery.publish_local(record);
    }

    async fn search_subnet(&self, subnet: SubnetId) -> usize {
        let connected = self.peers(&PeerFilter::connected());
        let serving = self.search.serving(&connected, subnet);
        if serving >= self.search.params().target_peers {
            return 0;
        }

        tracing::debug!(%subnet, serving, "found too few peers for subnet, finding new peers to connect");
        let report = self.search.ensure_subnet_peers(subnet, &connected).await;
        for candidate in &report.candidates {
            self.lifecycle.apply(candidate, LifecycleEvent::Discovered);
        }
        let found = report.newly_qualified_count();
        tracing::debug!(%subnet, found, "connected to new peers for subnet");
        found
    }

    fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected {
                peer,
                direction,
                session,
            } => self.on_connect(peer, direction, session),
            TransportEvent::Disconnected { peer, session } => self.on_disconnect(peer, session),
        }
    }

    fn on_connect(&self, peer: PeerId, direction: Direction, session: SessionId) {
        let (inserted, first) = {
            let mut sessions = self.sessions.entry(peer).or_default();
            let first = sessions.is_empty();
            (sessions.insert(session), first)
        };
        if !inserted {
            tracing::debug!(peer = %peer.short(), ?session, "duplicate connect notification");
            return;
        }
        if !first {
            tracing::trace!(peer = %peer.short(), ?session, "additional session for connected peer");
            return;
        }

        self.connected.fetch_add(1, Ordering::SeqCst);
        self.lifecycle.apply(&peer, LifecycleEvent::Connected);
        tracing::debug!(peer = %peer.short(), %direction, "peer connected");
        // No subscribers is fine.
        let _ = self.events.send(NetworkEvent::PeerConnect { peer, direction });
    }

    fn on_disconnect(&self, peer: PeerId, session: SessionId) {
        let last = match self.sessions.get_mut(&peer) {
            Some(mut sessions) => {
                if !sessions.remove(&session) {
                    tracing::warn!(peer = %peer.short(), ?session, "disconnect for unknown session, ignoring");
                    return;
                }
                sessions.is_empty()
            }
            None => {
                tracing::warn!(peer = %peer.short(), "disconnect without matching connect, ignoring");
                return;
            }
        };
        if !last {
            return;
        }

        self.sessions.remove_if(&peer, |_, s| s.is_empty());
        self.mark_disconnected(peer);
    }

    fn mark_disconnected(&self, peer: PeerId) {
        self.connected.fetch_sub(1, Ordering::SeqCst);
        self.lifecycle.apply(&peer, LifecycleEvent::Closed);
        tracing::debug!(peer = %peer.short(), "peer disconnected");
        let _ = self.events.send(NetworkEvent::PeerDisconnect { peer });
    }

    /// Rebuild session books from the transport after notifications were
    /// dropped, emitting the connect/disconnect events that were missed.
    /// The transport only exposes one session per peer, so a tracked peer's
    /// set collapses to that session.
    fn resync_sessions(&self) {
        let tracked: Vec<PeerId> = self.sessions.iter().map(|e| *e.key()).collect();
        for peer in tracked {
            match self.transport.connection(&peer).filter(|c| c.open) {
                Some(conn) => {
                    if let Some(mut sessions) = self.sessions.get_mut(&peer) {
                        sessions.clear();
                        sessions.insert(conn.session);
                    }
                }
                None => {
                    if self.sessions.remove(&peer).is_some() {
                        self.mark_disconnected(peer);
                    }
                }
            }
        }

        for (peer, _) in self.transport.peers() {
            if self.sessions.contains_key(&peer) {
                continue;
            }
            if let Some(conn) = self.transport.connection(&peer).filter(|c| c.open) {
                self.on_connect(peer, conn.direction, conn.session);
            }
        }
        tracing::debug!(
            connected = self.connected.load(Ordering::SeqCst),
            "sessions resynced"
        );
    }

    /// After the transport stops no more notifications arrive, so settle the
    /// books for every peer still marked connected.
    fn close_all_sessions(&self) {
        let peers: Vec<PeerId> = self.sessions.iter().map(|e| *e.key()).collect();
        for peer in peers {
            if self.sessions.remove(&peer).is_some() {
                self.mark_disconnected(peer);
            }
        }
    }
}

async fn event_loop(inner: Arc<Inner>, mut events: broadcast::Receiver<TransportEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => inner.handle_transport_event(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "transport event stream lagged, resyncing sessions");
                inner.resync_sessions();
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::debug!("transport event stream closed");
                return;
            }
        }
    }
}

async fn maintenance_loop(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(inner.maintenance_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let subnets: Vec<SubnetId> = inner.subnets.iter().map(|s| *s).collect();
        if subnets.is_empty() {
            continue;
        }
        let found = futures::future::join_all(subnets.iter().map(|&s| inner.search_subnet(s))).await;
        tracing::debug!(
            subnets = subnets.len(),
            found = found.iter().sum::<usize>(),
            connected = inner.connected.load(Ordering::SeqCst),
            "subnet maintenance tick"
        );
    }
}
