use crate::types::{PlayerId, PlayerState};

/// The host application serving a player's live session on this node.
///
/// The coordinator decides *when* state moves; the host owns the state
/// itself. `current_state` is the authoritative local copy forwarded to
/// peers or persisted on disconnect; `apply_state` installs a record that
/// arrived from a peer or was loaded from the backend.
pub trait StateHost: Send + Sync {
    /// Snapshot the live state of a player served by this node, if present.
    fn current_state(&self, player: PlayerId) -> Option<PlayerState>;

    /// Install a player's state into the live session.
    fn apply_state(&self, player: PlayerId, state: PlayerState);
}
