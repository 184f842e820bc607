//! The custody node: session lifecycle machine, packet dispatch, and the
//! primary execution context tying them together.
//!
//! One spawned task drains a command channel and owns every piece of mutable
//! per-player bookkeeping (session records, pending slots, custody claims).
//! Host events and bus frames enter as commands; backend I/O runs in worker
//! tasks whose completions re-enter the same channel, so no two lifecycle
//! transitions for a player ever interleave.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::backend::StateBackend;
use crate::config::CustodyConfig;
use crate::error::CustodyError;
use crate::fetch::{self, FetchContext};
use crate::host::StateHost;
use crate::lock::LockCoordinator;
use crate::metrics::CustodyMetrics;
use crate::pending::{PendingEntry, PendingTable};
use crate::protocol::Packet;
use crate::transport::{MessageBus, SendScope};
use crate::types::{PlayerId, PlayerState};

/// Commands processed by the primary context.
#[derive(Debug)]
pub(crate) enum Command {
    Authenticating(PlayerId),
    Connected(PlayerId),
    Disconnected(PlayerId),
    Deliver {
        tag: String,
        sender: String,
        bytes: Vec<u8>,
    },
    FetchResolved {
        player: PlayerId,
        state: Option<PlayerState>,
    },
    SaveFinished {
        player: PlayerId,
        ok: bool,
    },
    Flush(oneshot::Sender<()>),
}

/// Lifecycle phase of a session record.
///
/// "No session" is represented by absence from the session map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    /// Connect fired; state is being fetched or was just applied.
    Initializing,
    /// This node answered a peer's data request for the player, so ownership
    /// is being given away.
    DataForwarded,
}

/// Entry point: spawns the primary context for one node.
pub struct CustodyNode;

impl CustodyNode {
    pub fn spawn(
        config: CustodyConfig,
        backend: Arc<dyn StateBackend>,
        bus: Arc<dyn MessageBus>,
        host: Arc<dyn StateHost>,
        metrics: Arc<CustodyMetrics>,
    ) -> Result<NodeHandle, CustodyError> {
        config.validate()?;
        let (commands, rx) = mpsc::channel(config.command_queue_capacity);
        let cancel = CancellationToken::new();
        let inner = NodeInner {
            lock: LockCoordinator::new(Arc::clone(&backend)),
            config,
            backend,
            bus,
            host,
            metrics,
            sessions: HashMap::new(),
            pending: PendingTable::new(),
            commands: commands.clone(),
        };
        tokio::spawn(inner.run(rx, cancel.clone()));
        Ok(NodeHandle { commands, cancel })
    }
}

/// Cloneable handle to a running custody node.
///
/// The host's session layer reports connection events through it and wires
/// the transport's receive callback to [`deliver`](NodeHandle::deliver).
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl NodeHandle {
    /// A client passed authentication and will connect shortly. Claims the
    /// player early so a straggling peer request cannot race the connect.
    pub async fn client_authenticating(&self, player: PlayerId) -> Result<(), CustodyError> {
        self.send(Command::Authenticating(player)).await
    }

    /// A client finished connecting to this node.
    pub async fn client_connected(&self, player: PlayerId) -> Result<(), CustodyError> {
        self.send(Command::Connected(player)).await
    }

    /// A client disconnected from this node.
    pub async fn client_disconnected(&self, player: PlayerId) -> Result<(), CustodyError> {
        self.send(Command::Disconnected(player)).await
    }

    /// Feed a raw frame received from the message bus into the dispatcher.
    pub async fn deliver(
        &self,
        tag: &str,
        sender: &str,
        bytes: Vec<u8>,
    ) -> Result<(), CustodyError> {
        self.send(Command::Deliver {
            tag: tag.to_string(),
            sender: sender.to_string(),
            bytes,
        })
        .await
    }

    /// Wait until every command queued before this call has been processed.
    pub async fn flush(&self) -> Result<(), CustodyError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx)).await?;
        rx.await.map_err(|_| CustodyError::ShuttingDown)
    }

    /// Stop the primary context and cancel in-flight fetches.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn send(&self, command: Command) -> Result<(), CustodyError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CustodyError::ShuttingDown)
    }
}

struct NodeInner {
    config: CustodyConfig,
    backend: Arc<dyn StateBackend>,
    bus: Arc<dyn MessageBus>,
    host: Arc<dyn StateHost>,
    lock: LockCoordinator,
    metrics: Arc<CustodyMetrics>,
    sessions: HashMap<PlayerId, Lifecycle>,
    pending: PendingTable,
    commands: mpsc::Sender<Command>,
}

impl NodeInner {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => {
                        self.handle(command).await;
                        self.update_gauges();
                    }
                    None => break,
                },
            }
        }
        for (_, entry) in self.pending.drain() {
            if let PendingEntry::Fetch(handle) = entry {
                handle.cancel();
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Authenticating(player) => {
                debug!(%player, "client authenticating, claiming early");
                self.lock.lock(player);
            }
            Command::Connected(player) => self.on_connect(player),
            Command::Disconnected(player) => {
                if let Err(e) = self.on_disconnect(player).await {
                    error!(player = %player, error = %e, "disconnect persistence aborted");
                }
            }
            Command::Deliver { tag, sender, bytes } => {
                self.on_deliver(&tag, &sender, &bytes).await;
            }
            Command::FetchResolved { player, state } => self.on_fetch_resolved(player, state),
            Command::SaveFinished { player, ok } => self.on_save_finished(player, ok),
            Command::Flush(tx) => {
                let _ = tx.send(());
            }
        }
    }

    fn update_gauges(&self) {
        self.metrics.sessions.set(self.sessions.len() as i64);
        self.metrics.pending_slots.set(self.pending.len() as i64);
        self.metrics
            .active_fetches
            .set(self.pending.fetch_count() as i64);
    }

    /// Connect: claim the player, then either consume state that arrived
    /// early or start fetching it.
    fn on_connect(&mut self, player: PlayerId) {
        debug!(%player, "client connected");
        self.lock.lock(player);
        self.sessions.insert(player, Lifecycle::Initializing);
        match self.pending.take_and_clear(player) {
            Some(PendingEntry::State(state)) => {
                debug!(%player, "consuming buffered state on connect");
                self.finish_initialization(player, Some(state));
            }
            Some(PendingEntry::Fetch(stale)) => {
                // Leftover from an earlier session; replace it.
                stale.cancel();
                self.start_fetch(player);
            }
            None => self.start_fetch(player),
        }
    }

    /// Install fetched state (or start fresh), release the local claim, and
    /// announce cluster-wide that the record is in use on this node.
    fn finish_initialization(&mut self, player: PlayerId, state: Option<PlayerState>) {
        match state {
            Some(state) => self.host.apply_state(player, state),
            None => debug!(%player, "no prior state, session starts fresh"),
        }
        self.lock.unlock(player);
        let _ = self.lock.propagate(player, true);
    }

    fn start_fetch(&mut self, player: PlayerId) {
        let ctx = FetchContext {
            backend: Arc::clone(&self.backend),
            bus: Arc::clone(&self.bus),
            channel_tag: self.config.channel_tag.clone(),
            interval: self.config.fetch_interval,
            commands: self.commands.clone(),
        };
        let handle = fetch::spawn(ctx, player);
        if let Some(PendingEntry::Fetch(displaced)) =
            self.pending.put(player, PendingEntry::Fetch(handle))
        {
            displaced.cancel();
        }
    }

    fn on_fetch_resolved(&mut self, player: PlayerId, state: Option<PlayerState>) {
        match self.pending.take_and_clear(player) {
            Some(PendingEntry::Fetch(handle)) => {
                handle.cancel();
                if !self.sessions.contains_key(&player) {
                    debug!(%player, "fetch resolved after session ended, discarding");
                    return;
                }
                self.finish_initialization(player, state);
            }
            Some(other) => {
                // The slot was re-occupied; this resolution is stale.
                debug!(%player, "discarding stale fetch resolution");
                self.pending.put(player, other);
            }
            None => {
                debug!(%player, "discarding fetch resolution with no pending slot");
            }
        }
    }

    /// Disconnect: persist if this node owns the record, otherwise just drop
    /// the claim. Session record and pending slot are cleared on every path.
    async fn on_disconnect(&mut self, player: PlayerId) -> Result<(), CustodyError> {
        debug!(%player, "client disconnected");
        let lifecycle = self.sessions.remove(&player);
        if let Some(PendingEntry::Fetch(handle)) = self.pending.take_and_clear(player) {
            handle.cancel();
        }
        let Some(lifecycle) = lifecycle else {
            return Ok(());
        };

        if lifecycle == Lifecycle::DataForwarded || self.lock.is_unlocked(player) {
            // Ownership rests (or rested) here; the record must be persisted.
            // A missing record at this point means the custody protocol was
            // violated elsewhere; abort loudly instead of dropping the data.
            let state = self
                .host
                .current_state(player)
                .ok_or(CustodyError::StateUnavailable { player })?;
            self.lock.lock(player);
            self.spawn_save(player, state);
        } else {
            // Still initializing under an active claim; nothing to save.
            self.lock.unlock(player);
            let _ = self.lock.propagate(player, false);
        }
        Ok(())
    }

    fn spawn_save(&self, player: PlayerId, state: PlayerState) {
        let backend = Arc::clone(&self.backend);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let ok = save_record(backend.as_ref(), player, &state).await;
            let _ = commands.send(Command::SaveFinished { player, ok }).await;
        });
    }

    fn on_save_finished(&mut self, player: PlayerId, ok: bool) {
        if ok {
            self.lock.unlock(player);
            self.metrics.saves.inc();
            debug!(%player, "state persisted, claim released");
        } else {
            // Claim and shared flag stay up so no peer loads a stale record.
            self.metrics.save_failures.inc();
            error!(%player, "save failed, keeping custody claim");
        }
    }

    /// Tag filter, decode, and kind dispatch for one incoming frame.
    async fn on_deliver(&mut self, tag: &str, sender: &str, bytes: &[u8]) {
        if tag != self.config.channel_tag {
            trace!(tag, "ignoring frame with foreign channel tag");
            return;
        }
        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(CustodyError::UnknownPacketKind { kind }) => {
                debug!(kind, "ignoring packet of unknown kind");
                return;
            }
            Err(e) => {
                warn!(error = %e, "dropping undecodable packet");
                return;
            }
        };
        match packet {
            Packet::PeerReady => {
                debug!(from = sender, "peer ready, re-broadcasting upstream");
                if let Err(e) = self
                    .bus
                    .send(SendScope::Upstream, &self.config.channel_tag, bytes)
                    .await
                {
                    warn!(error = %e, "failed to re-broadcast peer-ready upstream");
                }
            }
            Packet::DataRequest { player } => self.on_data_request(player, sender).await,
            Packet::DataResponse { player, payload } => {
                self.on_data_response(player, payload);
            }
        }
    }

    /// A peer asks for a player served here. Reply with the live state and
    /// mark the session `DataForwarded`, or with an explicit no-data marker
    /// when the record is already claimed by another transfer.
    async fn on_data_request(&mut self, player: PlayerId, requester: &str) {
        debug!(%player, from = requester, "received data request");
        if !self.sessions.contains_key(&player) {
            return;
        }
        let payload = if self.lock.is_locked(player) {
            debug!(%player, "record already claimed, answering with no data");
            Vec::new()
        } else {
            match self.host.current_state(player) {
                Some(state) => {
                    self.lock.lock(player);
                    self.sessions.insert(player, Lifecycle::DataForwarded);
                    let _ = self.lock.propagate(player, true);
                    self.metrics.states_forwarded.inc();
                    debug!(%player, to = requester, "forwarding state");
                    state.into_bytes()
                }
                None => {
                    warn!(%player, "session present but host has no state to forward");
                    Vec::new()
                }
            }
        };
        let response = Packet::DataResponse { player, payload };
        if let Err(e) = self
            .bus
            .send(
                SendScope::Node(requester.to_string()),
                &self.config.channel_tag,
                &response.encode(),
            )
            .await
        {
            warn!(%player, error = %e, "failed to send data response");
        }
    }

    /// A peer answered a data request. Resolve it against the pending slot:
    /// consume a waiting fetch, or buffer the payload when it beat the
    /// connect processing (never assume ordering between the two).
    fn on_data_response(&mut self, player: PlayerId, payload: Vec<u8>) {
        if payload.is_empty() {
            debug!(%player, "received no-data response");
            match self.pending.take_and_clear(player) {
                Some(PendingEntry::Fetch(handle)) => {
                    handle.cancel();
                    if self.sessions.contains_key(&player) {
                        self.finish_initialization(player, None);
                    }
                }
                Some(other) => {
                    self.pending.put(player, other);
                }
                None => {}
            }
            return;
        }
        let state = PlayerState::new(payload);
        match self.pending.take_and_clear(player) {
            Some(PendingEntry::Fetch(handle)) => {
                debug!(%player, "processing received state");
                handle.cancel();
                if !self.sessions.contains_key(&player) {
                    debug!(%player, "state arrived after session ended, discarding");
                    return;
                }
                self.finish_initialization(player, Some(state));
            }
            _ => {
                debug!(%player, "buffering state that arrived early");
                self.pending.put(player, PendingEntry::State(state));
            }
        }
    }
}

/// Persist one record under the shared lock flag.
///
/// The flag goes up before the write and comes down only after the write
/// succeeds, so a peer polling the flag never loads a half-written record.
/// On failure the flag stays up and the caller keeps the local claim.
async fn save_record(backend: &dyn StateBackend, player: PlayerId, state: &PlayerState) -> bool {
    if let Err(e) = backend.set_lock(player, true).await {
        error!(%player, error = %e, "failed to raise shared lock flag before save");
        return false;
    }
    if let Err(e) = backend.save_state(player, state).await {
        error!(%player, error = %e, "failed to persist state");
        return false;
    }
    if let Err(e) = backend.set_lock(player, false).await {
        error!(%player, error = %e, "state persisted but shared lock flag stuck");
        return false;
    }
    true
}
