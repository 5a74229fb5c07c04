//! meridian-sim — runs the peer overlay against a simulated network.
//!
//! Every remote peer lives in memory. Some never answer capability queries,
//! some publish malformed discovery records; the rest serve a random set of
//! subnets. The node keeps its subscribed subnets peered and logs a status
//! snapshot until Ctrl-C.

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};
use rand::Rng;

use meridian_core::config::{MeridianConfig, SimConfig};
use meridian_core::{
    AttestationSubnets, Metadata, PeerId, PeerRecord, SubnetId, ATTESTATION_SUBNET_COUNT,
};
use meridian_network::memory::{Behaviour, MemoryStack, SimPeer};
use meridian_network::{Network, NetworkEvent, PeerFilter, PeerState};

const METADATA_PROTOCOL: &str = "/eth2/beacon_chain/req/metadata/2/ssz_snappy";

#[derive(Debug, Default)]
struct Population {
    responsive: usize,
    silent: usize,
    malformed: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = MeridianConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = MeridianConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeridianConfig::default()
    });

    let local_id = PeerId::from_public_key(&rand::random::<[u8; 32]>());
    tracing::info!(peer_id = %local_id, peers = config.sim.peers, "meridian-sim starting");

    let stack = MemoryStack::new(config.network.listen_addrs.clone());
    let population = populate(&stack, &config.sim);
    tracing::info!(
        responsive = population.responsive,
        silent = population.silent,
        malformed = population.malformed,
        "simulated overlay ready"
    );

    let network = Network::new(stack.deps(local_id), &config);
    network.start().await.context("failed to start network")?;

    let mut events = network.subscribe();
    let mut report = tokio::time::interval(config.sim.report_interval());

    loop {
        tokio::select! {
            _ = report.tick() => {
                tracing::info!(status = %snapshot(&network), "status");
            }
            event = events.recv() => match event {
                Ok(NetworkEvent::PeerConnect { peer, direction }) => {
                    tracing::info!(peer = %peer.short(), %direction, "peer connected");
                }
                Ok(NetworkEvent::PeerDisconnect { peer }) => {
                    tracing::info!(peer = %peer.short(), "peer disconnected");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::error!(error = %e, "failed to listen for ctrl-c");
                }
                break;
            }
        }
    }

    tracing::info!("shutting down");
    network.stop().await;
    tracing::info!(status = %snapshot(&network), "final status");
    Ok(())
}

/// Register the simulated remotes and put their records in the discovery cache.
fn populate(stack: &MemoryStack, sim: &SimConfig) -> Population {
    let mut rng = rand::thread_rng();
    let mut population = Population::default();

    for i in 0..sim.peers {
        let id = PeerId::from_public_key(&rng.gen::<[u8; 32]>());
        let addr = SocketAddr::from((Ipv4Addr::from(0x0a00_0000 + i as u32 + 1), 9000));

        let attnets = AttestationSubnets::from_subnets(
            (0..ATTESTATION_SUBNET_COUNT)
                .filter(|_| rng.gen_bool(sim.subnet_density))
                .filter_map(SubnetId::new),
        );
        let behaviour = if rng.gen_bool(sim.timeout_ratio) {
            population.silent += 1;
            Behaviour::Hang
        } else {
            population.responsive += 1;
            Behaviour::Respond
        };

        stack.transport.add_remote(
            id,
            SimPeer {
                metadata: Metadata {
                    seq_number: 1,
                    attnets,
                },
                behaviour,
                protocols: vec![METADATA_PROTOCOL.to_string()],
                addr,
            },
        );

        let advertised = if rng.gen_bool(sim.malformed_ratio) {
            population.malformed += 1;
            // Truncated bitfield.
            attnets.to_ssz_bytes()[..5].to_vec()
        } else {
            attnets.to_ssz_bytes().to_vec()
        };
        stack.records.insert(PeerRecord {
            peer_id: id,
            seq: 1,
            attnets: Some(advertised),
            addrs: vec![addr],
        });
    }
    population
}

fn snapshot(network: &Network) -> serde_json::Value {
    let connected = network.peers(&PeerFilter::connected());
    let subnets: serde_json::Map<String, serde_json::Value> = network
        .subnets()
        .into_iter()
        .map(|s| {
            let serving = network.store().peers_with_subnet(&connected, s).len();
            (s.to_string(), serving.into())
        })
        .collect();
    let lowest: Vec<_> = network
        .scores()
        .ranked()
        .into_iter()
        .take(3)
        .map(|(peer, score)| serde_json::json!({ "peer": peer.short(), "score": score }))
        .collect();

    serde_json::json!({
        "peer_id": network.local_id(),
        "running": network.is_running(),
        "connected": network.connected_peer_count(),
        "connecting": network.peers_in_state(PeerState::Connecting),
        "disconnected": network.peers_in_state(PeerState::Disconnected),
        "local_seq": network.local_metadata().seq_number,
        "subnets": subnets,
        "lowest_scores": lowest,
    })
}
