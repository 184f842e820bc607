//! Single-writer custody coordination for per-player state across a cluster
//! of interchangeable nodes.
//!
//! Exactly one node is authoritative for a player's mutable record at any
//! instant. When a client drops off one node and reappears on another before
//! the first has finished persisting, the nodes negotiate the handoff over a
//! message bus: the joining node fetches the live record from whichever peer
//! still holds it, falling back to the shared store once the record's lock
//! flag clears.
//!
//! The crate owns the coordination protocol only. The durable store, the
//! byte transport, the state encoding, and connection-lifecycle detection are
//! external collaborators behind the [`backend::StateBackend`],
//! [`transport::MessageBus`], and [`host::StateHost`] traits plus the event
//! methods on [`node::NodeHandle`].
//!
//! # Example
//!
//! ```ignore
//! let handle = CustodyNode::spawn(config, backend, bus, host, metrics)?;
//! // wire transport receive -> handle.deliver(tag, sender, bytes)
//! handle.client_authenticating(player).await?;
//! handle.client_connected(player).await?;
//! // ... session runs ...
//! handle.client_disconnected(player).await?;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod fetch;
pub mod host;
pub mod lock;
pub mod metrics;
pub mod node;
pub mod pending;
pub mod protocol;
pub mod storage;
pub mod testing;
pub mod transport;
pub mod types;

/// Prelude module for convenient glob imports.
pub mod prelude {
    pub use crate::backend::StateBackend;
    pub use crate::config::CustodyConfig;
    pub use crate::error::CustodyError;
    pub use crate::host::StateHost;
    pub use crate::metrics::CustodyMetrics;
    pub use crate::node::{CustodyNode, NodeHandle};
    pub use crate::protocol::Packet;
    pub use crate::transport::{MessageBus, SendScope};
    pub use crate::types::{PlayerId, PlayerState};
}
