use crate::error::CustodyError;
use std::time::Duration;

/// Configuration for one custody node.
#[derive(Debug, Clone)]
pub struct CustodyConfig {
    /// Name this node is known by on the message bus. Must be unique per node.
    pub node_name: String,
    /// Channel tag shared by all participating nodes. Incoming frames with a
    /// different tag are ignored. Default: "custody:v1".
    pub channel_tag: String,
    /// Interval between fetch attempts while waiting for a player's state.
    /// Default: 500ms.
    pub fetch_interval: Duration,
    /// Capacity of the primary context's command queue. Default: 256.
    pub command_queue_capacity: usize,
}

impl CustodyConfig {
    /// Validate configuration values. Returns an error if any value is invalid.
    pub fn validate(&self) -> Result<(), CustodyError> {
        if self.node_name.is_empty() {
            return Err(CustodyError::InvalidConfig {
                reason: "node_name must not be empty".to_string(),
            });
        }
        if self.channel_tag.is_empty() {
            return Err(CustodyError::InvalidConfig {
                reason: "channel_tag must not be empty".to_string(),
            });
        }
        if self.fetch_interval.is_zero() {
            return Err(CustodyError::InvalidConfig {
                reason: "fetch_interval must be > 0".to_string(),
            });
        }
        if self.command_queue_capacity == 0 {
            return Err(CustodyError::InvalidConfig {
                reason: "command_queue_capacity must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            node_name: "local".to_string(),
            channel_tag: "custody:v1".to_string(),
            fetch_interval: Duration::from_millis(500),
            command_queue_capacity: 256,
        }
    }
}
