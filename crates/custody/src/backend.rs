use async_trait::async_trait;

use crate::error::CustodyError;
use crate::types::{PlayerId, PlayerState};

/// Durable storage shared by every node in the cluster.
///
/// Holds the persisted copy of each player's state and the per-player lock
/// flag that is the sole cross-node mutual-exclusion primitive. All
/// operations may be invoked off the primary context.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Load the persisted state for a player, if any exists.
    async fn load_state(&self, player: PlayerId) -> Result<Option<PlayerState>, CustodyError>;

    /// Persist a player's state. A failure must be reported; the caller never
    /// clears the lock flag on an unconfirmed save.
    async fn save_state(&self, player: PlayerId, state: &PlayerState)
        -> Result<(), CustodyError>;

    /// Read the shared lock flag for a player.
    async fn get_lock(&self, player: PlayerId) -> Result<bool, CustodyError>;

    /// Write the shared lock flag for a player.
    async fn set_lock(&self, player: PlayerId, locked: bool) -> Result<(), CustodyError>;
}
