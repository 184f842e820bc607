use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::StateBackend;
use crate::error::CustodyError;
use crate::types::{PlayerId, PlayerState};

/// In-memory state backend for testing.
///
/// One instance stands in for the shared store: clone the `Arc` into every
/// node of a test cluster so they all observe the same states and lock flags.
pub struct MemoryStateBackend {
    inner: Mutex<Inner>,
    /// When set, the next `save_state` call fails once. Used to exercise the
    /// save-failure path where the lock flag must not be cleared.
    fail_next_save: AtomicBool,
}

struct Inner {
    states: HashMap<PlayerId, PlayerState>,
    locks: HashSet<PlayerId>,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                states: HashMap::new(),
                locks: HashSet::new(),
            }),
            fail_next_save: AtomicBool::new(false),
        }
    }

    /// Arrange for the next `save_state` call to fail.
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    /// Seed a persisted state directly, bypassing the trait.
    pub fn insert_state(&self, player: PlayerId, state: PlayerState) {
        self.inner.lock().states.insert(player, state);
    }

    /// Read a persisted state directly, bypassing the trait.
    pub fn state_of(&self, player: PlayerId) -> Option<PlayerState> {
        self.inner.lock().states.get(&player).cloned()
    }

    /// Read the lock flag directly, bypassing the trait.
    pub fn lock_flag(&self, player: PlayerId) -> bool {
        self.inner.lock().locks.contains(&player)
    }
}

impl Default for MemoryStateBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn load_state(&self, player: PlayerId) -> Result<Option<PlayerState>, CustodyError> {
        Ok(self.inner.lock().states.get(&player).cloned())
    }

    async fn save_state(
        &self,
        player: PlayerId,
        state: &PlayerState,
    ) -> Result<(), CustodyError> {
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(CustodyError::backend("injected save failure"));
        }
        self.inner.lock().states.insert(player, state.clone());
        Ok(())
    }

    async fn get_lock(&self, player: PlayerId) -> Result<bool, CustodyError> {
        Ok(self.inner.lock().locks.contains(&player))
    }

    async fn set_lock(&self, player: PlayerId, locked: bool) -> Result<(), CustodyError> {
        let mut inner = self.inner.lock();
        if locked {
            inner.locks.insert(player);
        } else {
            inner.locks.remove(&player);
        }
        Ok(())
    }
}
