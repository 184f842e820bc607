use crate::types::PlayerId;

/// Errors that can occur in the custody coordination system.
#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    #[error("backend operation failed: {reason}")]
    Backend {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("malformed packet: {reason}")]
    MalformedPacket {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("unknown packet kind: {kind}")]
    UnknownPacketKind { kind: u8 },

    #[error("no state available to persist for player {player}")]
    StateUnavailable { player: PlayerId },

    #[error("message bus send failed: {reason}")]
    BusUnavailable {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("node is shutting down")]
    ShuttingDown,
}

impl CustodyError {
    /// Shorthand for a backend failure without an underlying source error.
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
            source: None,
        }
    }
}
