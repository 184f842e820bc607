//! In-memory test cluster for unit and integration testing.
//!
//! Wires any number of custody nodes to one shared [`MemoryStateBackend`]
//! and one [`MemoryBusHub`], with a [`RecordingHost`] per node standing in
//! for the host application's live session layer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::StateBackend;
use crate::config::CustodyConfig;
use crate::host::StateHost;
use crate::metrics::CustodyMetrics;
use crate::node::{CustodyNode, NodeHandle};
use crate::storage::MemoryStateBackend;
use crate::transport::memory::{BusFrame, MemoryBusHub};
use crate::transport::MessageBus;
use crate::types::{PlayerId, PlayerState};

/// Host stand-in that keeps live states in a map and records every apply.
pub struct RecordingHost {
    states: Mutex<HashMap<PlayerId, PlayerState>>,
    applied: Mutex<Vec<(PlayerId, PlayerState)>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Seed a live state, as if the host had been serving the player.
    pub fn set_state(&self, player: PlayerId, state: PlayerState) {
        self.states.lock().insert(player, state);
    }

    pub fn state_of(&self, player: PlayerId) -> Option<PlayerState> {
        self.states.lock().get(&player).cloned()
    }

    /// Every state the coordinator applied for a player, in order.
    pub fn applied_for(&self, player: PlayerId) -> Vec<PlayerState> {
        self.applied
            .lock()
            .iter()
            .filter(|(p, _)| *p == player)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

impl Default for RecordingHost {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHost for RecordingHost {
    fn current_state(&self, player: PlayerId) -> Option<PlayerState> {
        self.states.lock().get(&player).cloned()
    }

    fn apply_state(&self, player: PlayerId, state: PlayerState) {
        self.states.lock().insert(player, state.clone());
        self.applied.lock().push((player, state));
    }
}

/// A multi-node in-memory cluster sharing one backend and one bus hub.
pub struct TestHarness {
    hub: Arc<MemoryBusHub>,
    backend: Arc<MemoryStateBackend>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self {
            hub: MemoryBusHub::new(),
            backend: Arc::new(MemoryStateBackend::new()),
        }
    }

    /// The shared store every node reads and writes.
    pub fn backend(&self) -> &Arc<MemoryStateBackend> {
        &self.backend
    }

    /// Frames passed upstream by any node (peer-ready pass-through).
    pub fn upstream_frames(&self) -> Vec<BusFrame> {
        self.hub.upstream_frames()
    }

    /// Register a bare bus endpoint that records what is sent to it, without
    /// running a node behind it. Useful for asserting on replies.
    pub fn observer(&self, name: &str) -> tokio::sync::mpsc::UnboundedReceiver<BusFrame> {
        let (_bus, rx) = self.hub.register(name);
        rx
    }

    /// Add a node with a short fetch interval suitable for tests.
    pub async fn add_node(&self, name: &str) -> TestNode {
        self.add_node_with_config(CustodyConfig {
            node_name: name.to_string(),
            fetch_interval: Duration::from_millis(20),
            ..Default::default()
        })
        .await
    }

    pub async fn add_node_with_config(&self, config: CustodyConfig) -> TestNode {
        let name = config.node_name.clone();
        let (bus, mut incoming) = self.hub.register(name.clone());
        let host = Arc::new(RecordingHost::new());
        let metrics = Arc::new(CustodyMetrics::unregistered());
        let handle = CustodyNode::spawn(
            config,
            Arc::clone(&self.backend) as Arc<dyn StateBackend>,
            Arc::new(bus) as Arc<dyn MessageBus>,
            Arc::clone(&host) as Arc<dyn StateHost>,
            Arc::clone(&metrics),
        )
        .expect("test config should be valid");

        // Pump incoming frames into the dispatcher until the node stops.
        let pump = handle.clone();
        tokio::spawn(async move {
            while let Some(frame) = incoming.recv().await {
                if pump
                    .deliver(&frame.tag, &frame.sender, frame.bytes)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        TestNode {
            name,
            handle,
            host,
            metrics,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// One node of a [`TestHarness`] cluster.
pub struct TestNode {
    pub name: String,
    pub handle: NodeHandle,
    pub host: Arc<RecordingHost>,
    pub metrics: Arc<CustodyMetrics>,
}

/// Poll a condition until it holds or the timeout elapses.
pub async fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_connect_creates_a_session() {
        let harness = TestHarness::new();
        let node = harness.add_node("a").await;
        let player = PlayerId::random();

        node.handle.client_authenticating(player).await.unwrap();
        node.handle.client_connected(player).await.unwrap();
        node.handle.flush().await.unwrap();

        assert_eq!(node.metrics.sessions.get(), 1);
        node.handle.shutdown();
    }

    #[tokio::test]
    async fn recording_host_tracks_applies() {
        let host = RecordingHost::new();
        let player = PlayerId::random();

        assert!(host.current_state(player).is_none());
        host.apply_state(player, PlayerState::new(vec![1]));
        host.apply_state(player, PlayerState::new(vec![2]));

        assert_eq!(host.state_of(player), Some(PlayerState::new(vec![2])));
        assert_eq!(host.applied_for(player).len(), 2);
    }

    #[tokio::test]
    async fn wait_for_times_out() {
        assert!(!wait_for(|| false, Duration::from_millis(30)).await);
        assert!(wait_for(|| true, Duration::from_millis(30)).await);
    }
}
