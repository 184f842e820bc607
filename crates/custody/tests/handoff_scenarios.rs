//! Multi-node handoff scenarios over an in-memory bus and shared backend.

use std::time::Duration;

use custody::backend::StateBackend;
use custody::protocol::Packet;
use custody::testing::{wait_for, TestHarness};
use custody::types::{PlayerId, PlayerState};

const TAG: &str = "custody:v1";
const WAIT: Duration = Duration::from_secs(2);

/// Fresh player, no prior state anywhere: the node claims the player, finds
/// nothing pending, and the fetch resolves fresh from the backend.
#[tokio::test]
async fn fresh_connect_starts_with_default_state() {
    let harness = TestHarness::new();
    let node = harness.add_node("a").await;
    let player = PlayerId::random();

    node.handle.client_authenticating(player).await.unwrap();
    node.handle.client_connected(player).await.unwrap();

    // Initialization completes and announces the record as in use.
    let backend = harness.backend().clone();
    assert!(wait_for(|| backend.lock_flag(player), WAIT).await);

    assert!(node.host.applied_for(player).is_empty());
    assert_eq!(node.metrics.sessions.get(), 1);
    assert_eq!(node.metrics.active_fetches.get(), 0);
    node.handle.shutdown();
}

/// Reconnect on another node before the first persisted: the joining node's
/// fetch sees the lock flag up, asks the peers, and the holding node forwards
/// its live copy.
#[tokio::test]
async fn reconnect_hands_off_live_state_between_nodes() {
    let harness = TestHarness::new();
    let node_a = harness.add_node("a").await;
    let node_b = harness.add_node("b").await;
    let player = PlayerId::random();
    let state = PlayerState::new(vec![1, 2, 3]);

    // Player session established on A.
    node_a.handle.client_authenticating(player).await.unwrap();
    node_a.handle.client_connected(player).await.unwrap();
    let backend = harness.backend().clone();
    assert!(wait_for(|| backend.lock_flag(player), WAIT).await);
    node_a.host.set_state(player, state.clone());

    // Client reappears on B while A still holds the record.
    node_b.handle.client_authenticating(player).await.unwrap();
    node_b.handle.client_connected(player).await.unwrap();

    let host_b = node_b.host.clone();
    assert!(wait_for(|| !host_b.applied_for(player).is_empty(), WAIT).await);
    assert_eq!(host_b.state_of(player), Some(state.clone()));
    assert_eq!(node_a.metrics.states_forwarded.get(), 1);

    // A's disconnect fires late; the forwarded record is persisted too.
    node_a.handle.client_disconnected(player).await.unwrap();
    let metrics_a = node_a.metrics.clone();
    assert!(wait_for(|| metrics_a.saves.get() == 1, WAIT).await);
    assert_eq!(harness.backend().state_of(player), Some(state));

    node_a.handle.shutdown();
    node_b.handle.shutdown();
}

/// The data response beats the local connect processing: it is buffered in
/// the pending slot and consumed on connect instead of starting a fetch.
#[tokio::test]
async fn early_data_response_is_buffered_until_connect() {
    let harness = TestHarness::new();
    let node = harness.add_node("b").await;
    let player = PlayerId::random();
    let state = PlayerState::new(vec![7, 7]);

    let response = Packet::DataResponse {
        player,
        payload: state.as_bytes().to_vec(),
    };
    node.handle
        .deliver(TAG, "a", response.encode())
        .await
        .unwrap();
    node.handle.flush().await.unwrap();
    assert_eq!(node.metrics.pending_slots.get(), 1);

    node.handle.client_authenticating(player).await.unwrap();
    node.handle.client_connected(player).await.unwrap();
    node.handle.flush().await.unwrap();

    // Consumed synchronously during connect; no fetch was ever started.
    assert_eq!(node.host.applied_for(player), vec![state]);
    assert_eq!(node.metrics.active_fetches.get(), 0);
    assert_eq!(node.metrics.pending_slots.get(), 0);
    node.handle.shutdown();
}

/// Disconnect while still initializing under an active claim: no save, the
/// claim is dropped and the release is announced to the store.
#[tokio::test]
async fn disconnect_while_initializing_skips_save() {
    let harness = TestHarness::new();
    let node = harness.add_node("a").await;
    let player = PlayerId::random();

    // Someone else still holds the record, so the fetch keeps waiting.
    harness
        .backend()
        .set_lock(player, true)
        .await
        .unwrap();

    node.handle.client_authenticating(player).await.unwrap();
    node.handle.client_connected(player).await.unwrap();
    node.handle.flush().await.unwrap();
    assert_eq!(node.metrics.active_fetches.get(), 1);

    node.handle.client_disconnected(player).await.unwrap();
    node.handle.flush().await.unwrap();

    assert_eq!(node.metrics.sessions.get(), 0);
    assert_eq!(node.metrics.active_fetches.get(), 0);
    assert_eq!(node.metrics.saves.get(), 0);
    assert!(harness.backend().state_of(player).is_none());

    // The abandoned claim's release reaches the shared store.
    let backend = harness.backend().clone();
    assert!(wait_for(|| !backend.lock_flag(player), WAIT).await);
    node.handle.shutdown();
}

/// Peer-ready announcements are not processed locally, only re-broadcast
/// upward to the enclosing router.
#[tokio::test]
async fn peer_ready_is_rebroadcast_upstream() {
    let harness = TestHarness::new();
    let node = harness.add_node("a").await;

    node.handle
        .deliver(TAG, "b", Packet::PeerReady.encode())
        .await
        .unwrap();
    node.handle.flush().await.unwrap();

    let frames = harness.upstream_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].sender, "a");
    assert_eq!(Packet::decode(&frames[0].bytes).unwrap(), Packet::PeerReady);
    node.handle.shutdown();
}

/// Frames with a foreign channel tag and packets of unknown kind are no-ops.
#[tokio::test]
async fn foreign_tags_and_unknown_kinds_are_ignored() {
    let harness = TestHarness::new();
    let node = harness.add_node("a").await;

    node.handle
        .deliver("other:tag", "b", Packet::PeerReady.encode())
        .await
        .unwrap();

    let mut unknown = Packet::PeerReady.encode();
    unknown[0] = 0xab;
    node.handle.deliver(TAG, "b", unknown).await.unwrap();
    node.handle.deliver(TAG, "b", vec![1, 2]).await.unwrap();
    node.handle.flush().await.unwrap();

    assert!(harness.upstream_frames().is_empty());
    assert_eq!(node.metrics.sessions.get(), 0);
    node.handle.shutdown();
}

/// While a forward is already in flight, a second data request for the same
/// player is answered with an explicit no-data marker, never a second copy.
#[tokio::test]
async fn concurrent_data_requests_get_one_copy_and_one_empty_reply() {
    let harness = TestHarness::new();
    let node = harness.add_node("a").await;
    let mut observer_b = harness.observer("b");
    let mut observer_c = harness.observer("c");
    let player = PlayerId::random();
    let state = PlayerState::new(vec![9]);

    node.handle.client_authenticating(player).await.unwrap();
    node.handle.client_connected(player).await.unwrap();
    let backend = harness.backend().clone();
    assert!(wait_for(|| backend.lock_flag(player), WAIT).await);
    node.host.set_state(player, state.clone());

    let request = Packet::DataRequest { player }.encode();
    node.handle.deliver(TAG, "b", request.clone()).await.unwrap();
    node.handle.deliver(TAG, "c", request).await.unwrap();
    node.handle.flush().await.unwrap();

    let to_b = observer_b.recv().await.unwrap();
    match Packet::decode(&to_b.bytes).unwrap() {
        Packet::DataResponse { payload, .. } => assert_eq!(payload, state.into_bytes()),
        other => panic!("expected DataResponse, got {other:?}"),
    }
    let to_c = observer_c.recv().await.unwrap();
    match Packet::decode(&to_c.bytes).unwrap() {
        Packet::DataResponse { payload, .. } => assert!(payload.is_empty()),
        other => panic!("expected DataResponse, got {other:?}"),
    }
    assert_eq!(node.metrics.states_forwarded.get(), 1);
    node.handle.shutdown();
}

/// A failed save must keep both the custody claim and the shared flag so no
/// peer loads a half-persisted record.
#[tokio::test]
async fn save_failure_keeps_the_lock_flag() {
    let harness = TestHarness::new();
    let node = harness.add_node("a").await;
    let player = PlayerId::random();

    node.handle.client_authenticating(player).await.unwrap();
    node.handle.client_connected(player).await.unwrap();
    let backend = harness.backend().clone();
    assert!(wait_for(|| backend.lock_flag(player), WAIT).await);
    node.host.set_state(player, PlayerState::new(vec![5]));

    harness.backend().fail_next_save();
    node.handle.client_disconnected(player).await.unwrap();

    let metrics = node.metrics.clone();
    assert!(wait_for(|| metrics.save_failures.get() == 1, WAIT).await);
    assert!(harness.backend().state_of(player).is_none());
    assert!(harness.backend().lock_flag(player));
    node.handle.shutdown();
}

/// Disconnecting a player whose state the host cannot produce aborts the
/// save path instead of persisting nothing.
#[tokio::test]
async fn disconnect_without_state_saves_nothing() {
    let harness = TestHarness::new();
    let node = harness.add_node("a").await;
    let player = PlayerId::random();

    node.handle.client_authenticating(player).await.unwrap();
    node.handle.client_connected(player).await.unwrap();
    let backend = harness.backend().clone();
    assert!(wait_for(|| backend.lock_flag(player), WAIT).await);

    // Host has no record for the player; the persistence path must abort.
    node.handle.client_disconnected(player).await.unwrap();
    node.handle.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(node.metrics.saves.get(), 0);
    assert_eq!(node.metrics.save_failures.get(), 0);
    assert!(harness.backend().state_of(player).is_none());
    node.handle.shutdown();
}

/// A response that arrives after the session ended (fetch already cancelled)
/// is never applied to the host.
#[tokio::test]
async fn late_response_after_disconnect_is_not_applied() {
    let harness = TestHarness::new();
    let node = harness.add_node("a").await;
    let player = PlayerId::random();

    harness.backend().set_lock(player, true).await.unwrap();
    node.handle.client_authenticating(player).await.unwrap();
    node.handle.client_connected(player).await.unwrap();
    node.handle.client_disconnected(player).await.unwrap();
    node.handle.flush().await.unwrap();

    let response = Packet::DataResponse {
        player,
        payload: vec![4, 4],
    };
    node.handle
        .deliver(TAG, "b", response.encode())
        .await
        .unwrap();
    node.handle.flush().await.unwrap();

    assert!(node.host.applied_for(player).is_empty());
    assert_eq!(node.metrics.sessions.get(), 0);
    node.handle.shutdown();
}

/// An empty data response resolves the wait: the session proceeds without
/// prior data instead of retrying forever against a skipping responder.
#[tokio::test]
async fn empty_response_resolves_session_fresh() {
    let harness = TestHarness::new();
    let node = harness.add_node("a").await;
    let player = PlayerId::random();

    harness.backend().set_lock(player, true).await.unwrap();
    node.handle.client_authenticating(player).await.unwrap();
    node.handle.client_connected(player).await.unwrap();
    node.handle.flush().await.unwrap();
    assert_eq!(node.metrics.active_fetches.get(), 1);

    let response = Packet::DataResponse {
        player,
        payload: Vec::new(),
    };
    node.handle
        .deliver(TAG, "b", response.encode())
        .await
        .unwrap();
    node.handle.flush().await.unwrap();

    assert!(node.host.applied_for(player).is_empty());
    assert_eq!(node.metrics.active_fetches.get(), 0);
    assert_eq!(node.metrics.sessions.get(), 1);
    node.handle.shutdown();
}

/// Full cycle: state persisted by the leaving node is picked up from the
/// backend by the next node once the flag clears.
#[tokio::test]
async fn disconnect_then_reconnect_loads_persisted_state() {
    let harness = TestHarness::new();
    let node_a = harness.add_node("a").await;
    let node_b = harness.add_node("b").await;
    let player = PlayerId::random();
    let state = PlayerState::new(vec![6, 6, 6]);

    node_a.handle.client_authenticating(player).await.unwrap();
    node_a.handle.client_connected(player).await.unwrap();
    let backend = harness.backend().clone();
    assert!(wait_for(|| backend.lock_flag(player), WAIT).await);
    node_a.host.set_state(player, state.clone());

    node_a.handle.client_disconnected(player).await.unwrap();
    let metrics_a = node_a.metrics.clone();
    assert!(wait_for(|| metrics_a.saves.get() == 1, WAIT).await);
    assert!(!harness.backend().lock_flag(player));

    node_b.handle.client_authenticating(player).await.unwrap();
    node_b.handle.client_connected(player).await.unwrap();
    let host_b = node_b.host.clone();
    assert!(wait_for(|| !host_b.applied_for(player).is_empty(), WAIT).await);
    assert_eq!(host_b.state_of(player), Some(state));

    node_a.handle.shutdown();
    node_b.handle.shutdown();
}
