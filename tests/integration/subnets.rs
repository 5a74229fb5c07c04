use crate::*;

use meridian_network::PeerState;

async fn started_with(config: MeridianConfig) -> Node {
    let n = node_with(config);
    n.network.start().await.unwrap();
    n
}

async fn started() -> Node {
    started_with(test_config()).await
}

/// Connected inbound peer whose stored payload serves `subnets`.
async fn connected_serving(
    n: &Node,
    i: u8,
    subnets: &[u8],
    rx: &mut broadcast::Receiver<NetworkEvent>,
) -> Result<PeerId> {
    let id = n.remote(i, subnets, Behaviour::Respond);
    n.stack.transport.accept_inbound(id);
    next_event(rx, 2).await?;
    n.network.store().set_metadata(
        &id,
        Some(Metadata {
            seq_number: 1,
            attnets: attnets(subnets),
        }),
    );
    Ok(id)
}

#[tokio::test]
async fn test_adequately_peered_subnet_is_left_alone() -> Result<()> {
    let n = started().await;
    let mut rx = n.network.subscribe();
    for i in 1..=3 {
        connected_serving(&n, i, &[7], &mut rx).await?;
    }
    n.discoverable(20, &[7], Behaviour::Respond);

    assert_eq!(n.network.search_subnet_peers(subnet(7)).await, 0);
    assert_eq!(n.stack.records.queries(), 0);
    assert_eq!(n.stack.reqresp.requests(), 0);

    n.network.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_search_connects_new_subnet_peer() -> Result<()> {
    let n = started().await;
    let mut rx = n.network.subscribe();
    connected_serving(&n, 1, &[7], &mut rx).await?;
    connected_serving(&n, 2, &[7], &mut rx).await?;
    let c = n.discoverable(3, &[7], Behaviour::Respond);

    assert_eq!(n.network.search_subnet_peers(subnet(7)).await, 1);
    assert_eq!(
        next_event(&mut rx, 2).await?,
        NetworkEvent::PeerConnect {
            peer: c,
            direction: meridian_core::Direction::Outbound
        }
    );
    assert!(n
        .network
        .store()
        .metadata(&c)
        .is_some_and(|m| m.attnets.get(subnet(7))));
    assert_eq!(n.network.peer_state(&c), PeerState::Connected);
    wait_until(2, || n.network.connected_peer_count() == 3).await?;

    // Now at target: a second search is a no-op.
    assert_eq!(n.network.search_subnet_peers(subnet(7)).await, 0);

    n.network.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_search_with_nothing_discovered() {
    let n = started().await;
    assert_eq!(n.network.search_subnet_peers(subnet(9)).await, 0);
    assert_eq!(n.stack.records.queries(), 1);
    assert_eq!(n.stack.reqresp.requests(), 0);
    n.network.stop().await;
}

#[tokio::test]
async fn test_unresponsive_candidates_are_penalized() {
    let n = started().await;
    let hanging: Vec<_> = (1..=3).map(|i| n.discoverable(i, &[11], Behaviour::Hang)).collect();
    let rejecting = n.discoverable(4, &[11], Behaviour::Reject);

    assert_eq!(n.network.search_subnet_peers(subnet(11)).await, 0);

    let params = *n.network.scores().params();
    for p in &hanging {
        assert_eq!(n.network.scores().current_score(p), params.timeout);
        assert!(n.network.store().metadata(p).is_none());
    }
    assert_eq!(
        n.network.scores().current_score(&rejecting),
        params.protocol_violation
    );
    // Each candidate was queried exactly once.
    assert_eq!(n.stack.reqresp.requests(), 4);

    n.network.stop().await;
}

#[tokio::test]
async fn test_candidates_not_advertising_subnet_are_not_queried() {
    let n = started().await;
    n.discoverable(1, &[2], Behaviour::Respond);
    n.discoverable(2, &[3], Behaviour::Respond);

    assert_eq!(n.network.search_subnet_peers(subnet(1)).await, 0);
    assert_eq!(n.stack.reqresp.requests(), 0);
    n.network.stop().await;
}

#[tokio::test]
async fn test_new_peers_per_search_are_capped() {
    let mut config = test_config();
    config.subnets.max_candidate_attempts = 20;
    let n = started_with(config).await;
    for i in 1..=15 {
        n.discoverable(i, &[4], Behaviour::Respond);
    }

    assert_eq!(n.network.search_subnet_peers(subnet(4)).await, 10);
    assert!(n.stack.reqresp.requests() < 15);
    n.network.stop().await;
}

#[tokio::test]
async fn test_candidate_attempts_are_capped() {
    let mut config = test_config();
    config.subnets.max_candidate_attempts = 5;
    let n = started_with(config).await;
    for i in 1..=12 {
        n.discoverable(i, &[4], Behaviour::Hang);
    }

    assert_eq!(n.network.search_subnet_peers(subnet(4)).await, 0);
    assert_eq!(n.stack.reqresp.requests(), 5);
    n.network.stop().await;
}

#[tokio::test]
async fn test_low_score_candidates_are_skipped() {
    let n = started().await;
    let bad = n.discoverable(1, &[6], Behaviour::Respond);
    for _ in 0..3 {
        n.network
            .scores()
            .record_outcome(&bad, meridian_peers::Outcome::ProtocolViolation);
    }
    assert!(n.network.scores().should_disconnect(&bad));

    assert_eq!(n.network.search_subnet_peers(subnet(6)).await, 0);
    assert_eq!(n.stack.reqresp.requests(), 0);
    n.network.stop().await;
}

#[tokio::test]
async fn test_repeated_searches_stay_bounded() {
    let n = started().await;
    for i in 1..=3 {
        n.discoverable(i, &[8], Behaviour::Hang);
    }

    for _ in 0..3 {
        assert_eq!(n.network.search_subnet_peers(subnet(8)).await, 0);
    }
    // The first search dialed every candidate; connected peers are not
    // candidates again.
    assert_eq!(n.stack.reqresp.requests(), 3);
    assert_eq!(n.stack.transport.dials(), 3);
    n.network.stop().await;
}

#[tokio::test]
async fn test_subscribe_subnet_republishes_record() {
    let n = started().await;
    let before = n.stack.records.local_record().unwrap();

    n.network.subscribe_subnet(subnet(12));
    let after = n.stack.records.local_record().unwrap();
    assert_eq!(after.seq, before.seq + 1);
    assert_eq!(n.network.local_metadata().attnets, attnets(&[12]));
    assert_eq!(n.network.subnets(), vec![subnet(12)]);

    // No change, no new sequence number.
    n.network.subscribe_subnet(subnet(12));
    assert_eq!(n.stack.records.local_record().unwrap().seq, after.seq);

    n.network.unsubscribe_subnet(subnet(12));
    assert_eq!(n.stack.records.local_record().unwrap().seq, after.seq + 1);
    assert!(n.network.local_metadata().attnets.is_empty());
    assert!(n.network.subnets().is_empty());

    n.network.stop().await;
}

#[tokio::test]
async fn test_configured_subnets_start_at_one_sequence_number() {
    let mut config = test_config();
    config.network.subscribed_subnets = vec![7, 1, 3];
    let n = started_with(config).await;

    assert_eq!(
        n.network.local_metadata(),
        Metadata {
            seq_number: 1,
            attnets: attnets(&[1, 3, 7]),
        }
    );
    assert_eq!(n.network.subnets(), vec![subnet(1), subnet(3), subnet(7)]);
    assert_eq!(n.stack.records.local_record().unwrap().seq, 1);

    n.network.stop().await;
}

#[tokio::test]
async fn test_maintenance_backfills_subscribed_subnets() -> Result<()> {
    let mut config = test_config();
    config.network.subscribed_subnets = vec![21];
    let n = node_with(config);
    let c = n.discoverable(1, &[21], Behaviour::Respond);
    let mut rx = n.network.subscribe();

    // The first maintenance tick runs right after start.
    n.network.start().await?;
    assert_eq!(next_event(&mut rx, 2).await?.peer(), &c);
    wait_until(2, || n.network.store().metadata(&c).is_some()).await?;

    n.network.stop().await;
    Ok(())
}
