use crate::ChainState;
use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Durable home of the chain snapshot. Storage backends implement this;
/// it lives in `archive-core` so the maintainer can depend on it.
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<ChainState>>;
    fn save(&self, state: &ChainState) -> Result<()>;
}

/// Keeps the snapshot in memory. Used by tests and `--in-memory` nodes.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<ChainState>>,
    corrupt: AtomicBool,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: ChainState) -> Self {
        Self {
            slot: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    /// A store whose snapshot cannot be decoded.
    pub fn corrupted() -> Self {
        let store = Self::default();
        store.corrupt.store(true, Ordering::SeqCst);
        store
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Option<ChainState> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<ChainState>> {
        if self.corrupt.load(Ordering::SeqCst) {
            bail!("snapshot holds data of the wrong type");
        }
        Ok(self.saved())
    }

    fn save(&self, state: &ChainState) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            bail!("snapshot save failure injected");
        }
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
