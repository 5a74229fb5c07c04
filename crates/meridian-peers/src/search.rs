//! Subnet peer search: backfills a subnet that has too few connected peers.
//!
//! 1. Count connected peers whose stored capability payload serves the subnet.
//! 2. At or above the target: done, no network calls.
//! 3. Otherwise ask discovery for candidates, minus connected and low-score peers.
//! 4. Query candidates' capability payload directly (records are self-reports
//!    and may be stale or false), bounded concurrency, per-query deadline.
//! 5. Stop as soon as `max_new_peers` candidates have confirmed the subnet.
//!
//! Every failure funnels through `skip_candidate`. Nothing here returns an
//! error: finding zero peers is a normal outcome under churn.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use futures::StreamExt;

use meridian_core::config::SubnetConfig;
use meridian_core::{PeerId, SubnetId};

use crate::discovery::{DiscoveryAdapter, SkipReason};
use crate::protocol::{CapabilityQueryError, ReqResp};
use crate::score::{Outcome, ScoreTracker};
use crate::store::PeerMetadataStore;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    pub target_peers: usize,
    pub max_new_peers: usize,
    pub max_attempts: usize,
    pub concurrency: usize,
    pub query_timeout: Duration,
}

impl From<&SubnetConfig> for SearchParams {
    fn from(c: &SubnetConfig) -> Self {
        Self {
            target_peers: c.target_peers_per_subnet,
            max_new_peers: c.max_new_peers_per_search,
            max_attempts: c.max_candidate_attempts,
            concurrency: c.query_concurrency.max(1),
            query_timeout: c.query_timeout(),
        }
    }
}

impl Default for SearchParams {
    fn default() -> Self {
        Self::from(&SubnetConfig::default())
    }
}

/// What one search run did. Only used for logging and metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchReport {
    pub subnet: Option<SubnetId>,
    /// Connected peers already serving the subnet when the search started.
    pub already_serving: usize,
    /// Discovery candidates that survived filtering, in query order.
    pub candidates: Vec<PeerId>,
    /// Candidates whose live capability payload confirmed the subnet.
    pub newly_qualified: Vec<PeerId>,
    pub skipped: HashMap<SkipReason, usize>,
    /// Another search for the same subnet was already running.
    pub coalesced: bool,
}

impl SearchReport {
    fn new(subnet: SubnetId, already_serving: usize) -> Self {
        Self {
            subnet: Some(subnet),
            already_serving,
            ..Default::default()
        }
    }

    pub fn newly_qualified_count(&self) -> usize {
        self.newly_qualified.len()
    }

    pub fn skipped(&self, reason: SkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }
}

// Removes the subnet from the in-flight set even if the search future is dropped.
struct InFlight {
    set: Arc<DashSet<SubnetId>>,
    subnet: SubnetId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.remove(&self.subnet);
    }
}

#[derive(Clone)]
pub struct SubnetPeerSearch {
    store: PeerMetadataStore,
    scores: ScoreTracker,
    discovery: DiscoveryAdapter,
    transport: Arc<dyn Transport>,
    reqresp: Arc<dyn ReqResp>,
    params: SearchParams,
    in_flight: Arc<DashSet<SubnetId>>,
}

impl SubnetPeerSearch {
    pub fn new(
        store: PeerMetadataStore,
        scores: ScoreTracker,
        discovery: DiscoveryAdapter,
        transport: Arc<dyn Transport>,
        reqresp: Arc<dyn ReqResp>,
        params: SearchParams,
    ) -> Self {
        Self {
            store,
            scores,
            discovery,
            transport,
            reqresp,
            params,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Connected peers whose stored payload serves `subnet`.
    pub fn serving(&self, connected: &[PeerId], subnet: SubnetId) -> usize {
        self.store.peers_with_subnet(connected, subnet).len()
    }

    /// Make sure `subnet` has enough peers, querying discovery candidates if not.
    pub async fn ensure_subnet_peers(&self, subnet: SubnetId, connected: &[PeerId]) -> SearchReport {
        let already_serving = self.serving(connected, subnet);
        let mut report = SearchReport::new(subnet, already_serving);

        if already_serving >= self.params.target_peers {
            tracing::trace!(%subnet, already_serving, "subnet adequately peered");
            return report;
        }

        if !self.in_flight.insert(subnet) {
            tracing::debug!(%subnet, "search already running for subnet");
            report.coalesced = true;
            return report;
        }
        let _in_flight = InFlight {
            set: self.in_flight.clone(),
            subnet,
        };

        tracing::debug!(
            %subnet,
            already_serving,
            target = self.params.target_peers,
            "subnet under target, searching for new peers"
        );

        let candidates = self.candidates(subnet, connected, &mut report.skipped);
        report.candidates = candidates.iter().map(|(p, _)| *p).collect();

        let mut queries = futures::stream::iter(candidates)
            .map(|(peer, addr)| self.query(peer, addr, subnet))
            .buffer_unordered(self.params.concurrency);

        while let Some((peer, result)) = queries.next().await {
            match result {
                Ok(()) => report.newly_qualified.push(peer),
                Err(reason) => self.skip_candidate(&peer, subnet, reason, &mut report.skipped),
            }
            if report.newly_qualified.len() >= self.params.max_new_peers {
                tracing::debug!(%subnet, cap = self.params.max_new_peers, "new peer cap reached");
                break;
            }
        }
        drop(queries);

        tracing::info!(
            %subnet,
            found = report.newly_qualified.len(),
            queried = report.candidates.len(),
            "subnet peer search finished"
        );
        report
    }

    /// Discovery results minus connected peers and peers we would not admit,
    /// best-scored first, capped at `max_attempts`.
    fn candidates(
        &self,
        subnet: SubnetId,
        connected: &[PeerId],
        skipped: &mut HashMap<SkipReason, usize>,
    ) -> Vec<(PeerId, SocketAddr)> {
        let connected: HashSet<&PeerId> = connected.iter().collect();
        let mut candidates = Vec::new();
        for (peer, addr) in self.discovery.find_peers_for_subnet(subnet) {
            if connected.contains(&peer) {
                continue;
            }
            if self.scores.should_disconnect(&peer) {
                *skipped.entry(SkipReason::LowScore).or_default() += 1;
                continue;
            }
            candidates.push((peer, addr));
        }
        candidates.sort_by_key(|(peer, _)| std::cmp::Reverse(self.scores.current_score(peer)));
        candidates.truncate(self.params.max_attempts);
        candidates
    }

    async fn query(
        &self,
        peer: PeerId,
        addr: SocketAddr,
        subnet: SubnetId,
    ) -> (PeerId, Result<(), SkipReason>) {
        // The request dials through the transport, which needs an address.
        self.transport.add_addresses(&peer, &[addr]);

        let result = match tokio::time::timeout(self.params.query_timeout, self.reqresp.metadata(&peer)).await {
            Err(_elapsed) => Err(SkipReason::Timeout),
            Ok(Err(CapabilityQueryError::Timeout)) => Err(SkipReason::Timeout),
            Ok(Err(CapabilityQueryError::Protocol(msg))) => {
                tracing::debug!(peer = %peer.short(), error = %msg, "capability query rejected");
                Err(SkipReason::ProtocolError)
            }
            Ok(Ok(metadata)) => {
                self.store.set_metadata(&peer, Some(metadata));
                if metadata.attnets.get(subnet) {
                    Ok(())
                } else {
                    Err(SkipReason::NoInterest)
                }
            }
        };
        (peer, result)
    }

    /// The one place a candidate is dropped. Query failures cost reputation;
    /// a payload that simply lacks the subnet does not.
    fn skip_candidate(
        &self,
        peer: &PeerId,
        subnet: SubnetId,
        reason: SkipReason,
        skipped: &mut HashMap<SkipReason, usize>,
    ) {
        match reason {
            SkipReason::Timeout => {
                self.scores.record_outcome(peer, Outcome::Timeout);
                tracing::warn!(peer = %peer.short(), %subnet, "capability query timed out, skipping");
            }
            SkipReason::ProtocolError => {
                self.scores.record_outcome(peer, Outcome::ProtocolViolation);
                tracing::warn!(peer = %peer.short(), %subnet, "cannot get metadata from candidate, skipping");
            }
            _ => {
                tracing::debug!(peer = %peer.short(), %subnet, ?reason, "candidate skipped");
            }
        }
        *skipped.entry(reason).or_default() += 1;
    }
}
