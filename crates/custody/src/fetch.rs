//! Fetch orchestrator: obtains a connecting player's state, locally or from
//! a peer.
//!
//! Each tick reads the shared lock flag. Unlocked means nobody is using or
//! transferring the state, so the persisted copy (or its absence, for a
//! brand-new player) is authoritative and the fetch resolves from the
//! backend. Locked means some node still holds the live record, so a
//! data-request is broadcast to peers and the loop retries on the next tick.
//! There is no retry limit; the task runs until it resolves or the session
//! ends and cancels it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::StateBackend;
use crate::node::Command;
use crate::protocol::Packet;
use crate::transport::{MessageBus, SendScope};
use crate::types::PlayerId;

/// Everything a fetch task needs, cloned per spawned player.
pub(crate) struct FetchContext {
    pub backend: Arc<dyn StateBackend>,
    pub bus: Arc<dyn MessageBus>,
    pub channel_tag: String,
    pub interval: Duration,
    pub commands: mpsc::Sender<Command>,
}

/// Handle to one in-flight fetch task.
///
/// Cancellation is cooperative: the task checks its token before delivering a
/// resolution, and the primary context additionally discards any resolution
/// whose pending slot no longer holds this fetch. A cancelled fetch therefore
/// never applies a state update.
pub struct FetchHandle {
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

impl FetchHandle {
    pub(crate) fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            cancel,
            _task: task,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Start the recurring fetch task for one player.
pub(crate) fn spawn(ctx: FetchContext, player: PlayerId) -> FetchHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ctx.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }
            match ctx.backend.get_lock(player).await {
                Ok(true) => {
                    // Someone still holds the record; ask the peers directly.
                    let packet = Packet::DataRequest { player };
                    if let Err(e) = ctx
                        .bus
                        .send(SendScope::Peers, &ctx.channel_tag, &packet.encode())
                        .await
                    {
                        warn!(%player, error = %e, "failed to broadcast data request");
                    }
                }
                Ok(false) => match ctx.backend.load_state(player).await {
                    Ok(state) => {
                        if token.is_cancelled() {
                            return;
                        }
                        debug!(%player, found = state.is_some(), "fetch resolved from backend");
                        let _ = ctx.commands.send(Command::FetchResolved { player, state }).await;
                        return;
                    }
                    Err(e) => {
                        warn!(%player, error = %e, "failed to load state, retrying");
                    }
                },
                Err(e) => {
                    warn!(%player, error = %e, "failed to read shared lock flag, retrying");
                }
            }
        }
    });
    FetchHandle::new(cancel, task)
}
