use std::sync::Arc;

use dashmap::DashSet;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::StateBackend;
use crate::error::CustodyError;
use crate::types::PlayerId;

/// Tracks per-player custody claims and mirrors them into the shared store.
///
/// Two layers with different jobs:
///
/// - The **claim table** is node-local and synchronous. A claim is set while
///   this node is actively initializing, forwarding, or persisting a player's
///   state, and gates both data-request contention (any claim ⇒ reply empty)
///   and the disconnect-save decision.
/// - The **shared flag** lives in the backend and is the cross-node signal
///   that a player's state is in active use or in transfer somewhere. Fetch
///   loops on other nodes poll it to choose between loading from the store
///   and asking peers. It is written asynchronously via [`propagate`], except
///   on the save path where clearing it must wait for a confirmed save.
///
/// [`propagate`]: LockCoordinator::propagate
pub struct LockCoordinator {
    backend: Arc<dyn StateBackend>,
    claims: DashSet<PlayerId>,
}

impl LockCoordinator {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self {
            backend,
            claims: DashSet::new(),
        }
    }

    /// Mark a local claim. Idempotent.
    pub fn lock(&self, player: PlayerId) {
        self.claims.insert(player);
    }

    /// Clear a local claim. Idempotent.
    pub fn unlock(&self, player: PlayerId) {
        self.claims.remove(&player);
    }

    pub fn is_locked(&self, player: PlayerId) -> bool {
        self.claims.contains(&player)
    }

    pub fn is_unlocked(&self, player: PlayerId) -> bool {
        !self.is_locked(player)
    }

    /// Read the shared flag from the backend.
    pub async fn shared_flag(&self, player: PlayerId) -> Result<bool, CustodyError> {
        self.backend.get_lock(player).await
    }

    /// Asynchronously write the shared flag without blocking the caller.
    ///
    /// Failures are logged; callers that must not proceed past an unconfirmed
    /// write (the save path) call the backend directly instead.
    pub fn propagate(&self, player: PlayerId, locked: bool) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            match backend.set_lock(player, locked).await {
                Ok(()) => debug!(%player, locked, "propagated lock flag"),
                Err(e) => warn!(%player, locked, error = %e, "failed to propagate lock flag"),
            }
        })
    }
}
