//! Meridian integration test harness.
//!
//! Every test runs a full `Network` on top of the in-memory collaborators,
//! so nothing here needs sockets or root:
//!
//!   cargo test --test integration
//!
//! Each test builds its own node; nothing is shared between tests.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast;

use meridian_core::config::MeridianConfig;
use meridian_core::{AttestationSubnets, Metadata, PeerId, PeerRecord, SubnetId};
use meridian_network::memory::{Behaviour, MemoryStack, SimPeer};
use meridian_network::{Network, NetworkEvent};

mod connections;
mod subnets;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const METADATA_PROTOCOL: &str = "/eth2/beacon_chain/req/metadata/2/ssz_snappy";

/// A network under test plus handles on its collaborators.
pub struct Node {
    pub network: Network,
    pub stack: MemoryStack,
}

/// Config tuned for tests: fast query timeout, maintenance effectively off.
pub fn test_config() -> MeridianConfig {
    let mut config = MeridianConfig::default();
    config.network.listen_addrs = vec!["127.0.0.1:9000".parse().unwrap()];
    config.network.maintenance_interval_secs = 3600;
    config.subnets.query_timeout_ms = 50;
    config
}

pub fn node() -> Node {
    node_with(test_config())
}

pub fn node_with(config: MeridianConfig) -> Node {
    let stack = MemoryStack::new(config.network.listen_addrs.clone());
    let network = Network::new(stack.deps(peer(0)), &config);
    Node { network, stack }
}

pub fn peer(n: u8) -> PeerId {
    PeerId::from_public_key(&[n; 32])
}

pub fn subnet(n: u8) -> SubnetId {
    SubnetId::new(n).unwrap()
}

pub fn addr(n: u8) -> SocketAddr {
    format!("10.0.0.{n}:9000").parse().unwrap()
}

pub fn attnets(subnets: &[u8]) -> AttestationSubnets {
    AttestationSubnets::from_subnets(subnets.iter().map(|&s| subnet(s)))
}

impl Node {
    /// Register remote `n` serving `subnets`. Not yet discoverable.
    pub fn remote(&self, n: u8, subnets: &[u8], behaviour: Behaviour) -> PeerId {
        let id = peer(n);
        self.stack.transport.add_remote(
            id,
            SimPeer {
                metadata: Metadata {
                    seq_number: 1,
                    attnets: attnets(subnets),
                },
                behaviour,
                protocols: vec![METADATA_PROTOCOL.to_string()],
                addr: addr(n),
            },
        );
        id
    }

    /// Register remote `n` and put a matching record in the discovery cache.
    pub fn discoverable(&self, n: u8, subnets: &[u8], behaviour: Behaviour) -> PeerId {
        let id = self.remote(n, subnets, behaviour);
        self.stack.records.insert(PeerRecord {
            peer_id: id,
            seq: 1,
            attnets: Some(attnets(subnets).to_ssz_bytes().to_vec()),
            addrs: vec![addr(n)],
        });
        id
    }
}

/// Next event within `secs`, or an error.
pub async fn next_event(
    rx: &mut broadcast::Receiver<NetworkEvent>,
    secs: u64,
) -> Result<NetworkEvent> {
    tokio::time::timeout(Duration::from_secs(secs), rx.recv())
        .await
        .context("timed out waiting for network event")?
        .context("event stream closed")
}

/// Assert no event arrives within `ms`.
pub async fn assert_quiet(rx: &mut broadcast::Receiver<NetworkEvent>, ms: u64) -> Result<()> {
    match tokio::time::timeout(Duration::from_millis(ms), rx.recv()).await {
        Err(_) => Ok(()),
        Ok(event) => bail!("unexpected event: {event:?}"),
    }
}

/// Poll `f` until it holds or `secs` elapse.
pub async fn wait_until(secs: u64, mut f: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    while tokio::time::Instant::now() < deadline {
        if f() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bail!("condition not met within {secs}s")
}
