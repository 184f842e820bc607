use std::collections::HashMap;

use crate::fetch::FetchHandle;
use crate::types::{PlayerId, PlayerState};

/// What a player's pending slot currently holds.
pub enum PendingEntry {
    /// A fetch task is in flight, waiting for state to become available.
    Fetch(FetchHandle),
    /// State arrived before the session finished setting up its fetch.
    State(PlayerState),
}

/// Per-player slot reconciling the race between a fetch and its answer.
///
/// At most one entry per player: either a live fetch task or an
/// early-arrived payload, never both. The slot is consumed atomically with
/// `take_and_clear`, so a response is applied at most once. Owned exclusively
/// by the primary context; never shared with I/O workers.
#[derive(Default)]
pub struct PendingTable {
    slots: HashMap<PlayerId, PendingEntry>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an entry for a player, replacing any previous one.
    ///
    /// Returns the displaced entry so the caller can cancel a replaced fetch
    /// rather than leaking it.
    pub fn put(&mut self, player: PlayerId, entry: PendingEntry) -> Option<PendingEntry> {
        self.slots.insert(player, entry)
    }

    /// Remove and return the current entry, if any.
    pub fn take_and_clear(&mut self, player: PlayerId) -> Option<PendingEntry> {
        self.slots.remove(&player)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots currently holding a live fetch task.
    pub fn fetch_count(&self) -> usize {
        self.slots
            .values()
            .filter(|entry| matches!(entry, PendingEntry::Fetch(_)))
            .count()
    }

    /// Remove and return every entry (node shutdown).
    pub fn drain(&mut self) -> Vec<(PlayerId, PendingEntry)> {
        self.slots.drain().collect()
    }
}
