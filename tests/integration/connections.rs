use crate::*;

use meridian_core::{Direction, Encoding, SessionId, Status};
use meridian_network::{NetworkError, PeerFilter, PeerState};
use meridian_peers::{DialError, Outcome, Transport, TransportEvent};

async fn started() -> Node {
    let n = node();
    n.network.start().await.unwrap();
    n
}

#[tokio::test]
async fn test_inbound_sessions_collapse_to_one_peer() -> Result<()> {
    let n = started().await;
    let mut rx = n.network.subscribe();
    let a = n.remote(1, &[], Behaviour::Respond);

    let s1 = n.stack.transport.accept_inbound(a);
    let s2 = n.stack.transport.accept_inbound(a);
    assert_eq!(
        next_event(&mut rx, 2).await?,
        NetworkEvent::PeerConnect { peer: a, direction: Direction::Inbound }
    );
    assert_quiet(&mut rx, 50).await?;
    assert_eq!(n.network.connected_peer_count(), 1);

    // Closing one of two sessions is not a disconnect.
    n.stack.transport.close_session(&a, s1);
    assert_quiet(&mut rx, 50).await?;
    assert_eq!(n.network.connected_peer_count(), 1);

    n.stack.transport.close_session(&a, s2);
    assert_eq!(next_event(&mut rx, 2).await?, NetworkEvent::PeerDisconnect { peer: a });
    assert_eq!(n.network.connected_peer_count(), 0);
    assert_eq!(n.network.peer_state(&a), PeerState::Disconnected);

    n.network.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_duplicate_and_unknown_notifications_are_ignored() -> Result<()> {
    let n = started().await;
    let mut rx = n.network.subscribe();
    let a = peer(1);

    let connected = TransportEvent::Connected {
        peer: a,
        direction: Direction::Outbound,
        session: SessionId(77),
    };
    n.stack.transport.inject(connected.clone());
    n.stack.transport.inject(connected);
    assert!(matches!(next_event(&mut rx, 2).await?, NetworkEvent::PeerConnect { .. }));
    assert_quiet(&mut rx, 50).await?;

    // Disconnect for a session we never saw, and for a peer we never saw.
    n.stack.transport.inject(TransportEvent::Disconnected { peer: a, session: SessionId(78) });
    n.stack.transport.inject(TransportEvent::Disconnected { peer: peer(2), session: SessionId(1) });
    assert_quiet(&mut rx, 50).await?;
    assert_eq!(n.network.connected_peer_count(), 1);

    n.stack.transport.inject(TransportEvent::Disconnected { peer: a, session: SessionId(77) });
    assert_eq!(next_event(&mut rx, 2).await?, NetworkEvent::PeerDisconnect { peer: a });
    assert_eq!(n.network.connected_peer_count(), 0);

    n.network.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_connect_and_disconnect() -> Result<()> {
    let n = started().await;
    let mut rx = n.network.subscribe();
    let a = n.remote(1, &[], Behaviour::Respond);

    n.network.connect(&a, &[addr(1)]).await?;
    assert_eq!(
        next_event(&mut rx, 2).await?,
        NetworkEvent::PeerConnect { peer: a, direction: Direction::Outbound }
    );
    assert!(n.network.has_peer(&a, true));
    assert_eq!(n.network.connection(&a).map(|c| c.direction), Some(Direction::Outbound));
    assert_eq!(n.network.peer_state(&a), PeerState::Connected);

    n.network.disconnect(&a).await;
    assert_eq!(next_event(&mut rx, 2).await?, NetworkEvent::PeerDisconnect { peer: a });
    assert!(n.network.has_peer(&a, false));
    assert!(!n.network.has_peer(&a, true));

    n.network.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_dial_forgets_never_connected_peer() {
    let n = started().await;
    let a = n.remote(1, &[], Behaviour::Unreachable);
    n.network.store().set_status(
        &a,
        Some(Status {
            fork_digest: [1, 2, 3, 4],
            finalized_root: [0; 32],
            finalized_epoch: 0,
            head_root: [0; 32],
            head_slot: 0,
        }),
    );

    let err = n.network.connect(&a, &[addr(1)]).await.unwrap_err();
    assert!(matches!(
        err,
        NetworkError::Dial { peer, source: DialError::Unreachable } if peer == a
    ));
    assert!(!n.network.store().contains(&a));
    assert_eq!(n.network.peer_state(&a), PeerState::Disconnected);

    n.network.stop().await;
}

#[tokio::test]
async fn test_failed_redial_keeps_previously_connected_peer() -> Result<()> {
    let n = started().await;
    let mut rx = n.network.subscribe();
    let a = n.remote(1, &[], Behaviour::Respond);

    n.network.connect(&a, &[addr(1)]).await?;
    next_event(&mut rx, 2).await?;
    n.network.store().set_metadata(&a, Some(Metadata { seq_number: 4, attnets: attnets(&[1]) }));
    n.network.disconnect(&a).await;
    next_event(&mut rx, 2).await?;

    n.stack.transport.set_behaviour(&a, Behaviour::Unreachable);
    assert!(n.network.connect(&a, &[]).await.is_err());
    assert_eq!(n.network.store().metadata(&a).map(|m| m.seq_number), Some(4));

    n.network.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_dial_keeps_low_score() {
    let n = started().await;
    let a = n.remote(1, &[], Behaviour::Unreachable);
    n.network.store().set_encoding(&a, Some(Encoding::SszSnappy));
    for _ in 0..3 {
        n.network.scores().record_outcome(&a, Outcome::ProtocolViolation);
    }
    let banned = n.network.scores().current_score(&a);
    assert!(n.network.scores().should_disconnect(&a));

    assert!(n.network.connect(&a, &[addr(1)]).await.is_err());
    assert_eq!(n.network.scores().current_score(&a), banned);
    assert!(n.network.scores().should_disconnect(&a));
    assert_eq!(n.network.store().encoding(&a), None);

    n.network.stop().await;
}

#[tokio::test]
async fn test_lagged_transport_events_are_resynced() -> Result<()> {
    let n = started().await;
    let mut rx = n.network.subscribe();
    let a = n.remote(1, &[], Behaviour::Respond);
    let b = n.remote(2, &[], Behaviour::Respond);

    let s = n.stack.transport.accept_inbound(a);
    next_event(&mut rx, 2).await?;
    assert_eq!(n.network.connected_peer_count(), 1);

    // Nothing below yields, so the event loop falls behind and loses both
    // the disconnect of a and the connect of b.
    n.stack.transport.close_session(&a, s);
    n.stack.transport.accept_inbound(b);
    for i in 0..1100 {
        n.stack.transport.inject(TransportEvent::Disconnected {
            peer: peer(99),
            session: SessionId(10_000 + i),
        });
    }

    assert_eq!(next_event(&mut rx, 2).await?, NetworkEvent::PeerDisconnect { peer: a });
    assert_eq!(
        next_event(&mut rx, 2).await?,
        NetworkEvent::PeerConnect { peer: b, direction: Direction::Inbound }
    );
    assert_eq!(n.network.connected_peer_count(), 1);
    assert!(n.network.prune_peer(&a));
    assert!(!n.network.prune_peer(&b));

    n.network.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_connect_without_address() {
    let n = started().await;
    let a = n.remote(1, &[], Behaviour::Respond);
    assert!(matches!(
        n.network.connect(&a, &[]).await,
        Err(NetworkError::Dial { source: DialError::NoAddress, .. })
    ));
    n.network.stop().await;
}

#[tokio::test]
async fn test_peer_filters() -> Result<()> {
    let n = started().await;
    let mut rx = n.network.subscribe();

    let a = n.remote(1, &[], Behaviour::Respond);
    let b = n.remote(2, &[], Behaviour::Respond);
    n.stack.transport.accept_inbound(a);
    next_event(&mut rx, 2).await?;
    // b is known but not connected.
    n.stack.transport.add_addresses(&b, &[addr(2)]);

    let mut all = n.network.peers(&PeerFilter::default());
    all.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(all, expected);

    assert_eq!(n.network.peers(&PeerFilter::connected()), vec![a]);

    let speaks = PeerFilter {
        connected: false,
        supports_protocols: vec![METADATA_PROTOCOL.to_string()],
    };
    assert_eq!(n.network.peers(&speaks), vec![a]);

    n.network.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_prune_only_disconnected_peers() -> Result<()> {
    let n = started().await;
    let mut rx = n.network.subscribe();
    let a = n.remote(1, &[], Behaviour::Respond);

    n.stack.transport.accept_inbound(a);
    next_event(&mut rx, 2).await?;
    n.network.store().set_metadata(&a, Some(Metadata::default()));

    assert!(!n.network.prune_peer(&a));
    assert!(n.network.store().contains(&a));

    n.network.disconnect(&a).await;
    next_event(&mut rx, 2).await?;
    assert!(n.network.prune_peer(&a));
    assert!(!n.network.store().contains(&a));
    assert_eq!(n.network.peer_state(&a), PeerState::Unknown);

    n.network.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_dropped_subscriber_does_not_block_others() -> Result<()> {
    let n = started().await;
    let dropped = n.network.subscribe();
    let mut rx = n.network.subscribe();
    drop(dropped);

    let a = n.remote(1, &[], Behaviour::Respond);
    n.stack.transport.accept_inbound(a);
    assert_eq!(next_event(&mut rx, 2).await?.peer(), &a);

    n.network.stop().await;
    Ok(())
}
