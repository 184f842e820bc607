//! Message transport between nodes.
//!
//! The bus is an external collaborator: delivery is best-effort and
//! at-most-once per attempt. The fetch orchestrator's retry loop provides
//! effective at-least-once semantics at the protocol layer.

pub mod memory;

use async_trait::async_trait;

use crate::error::CustodyError;

/// Where an outgoing frame should be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendScope {
    /// Every node except the sender.
    Peers,
    /// One specific node, addressed by its bus name.
    Node(String),
    /// The enclosing router above the cluster (peer-ready pass-through).
    Upstream,
}

/// Byte-payload message bus connecting the nodes of a cluster.
///
/// Incoming frames are handed to the node via `NodeHandle::deliver`, together
/// with the sender identity supplied by the transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn send(
        &self,
        scope: SendScope,
        tag: &str,
        payload: &[u8],
    ) -> Result<(), CustodyError>;
}
