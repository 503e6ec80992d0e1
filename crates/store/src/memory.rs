//! In-process store for tests and ephemeral runs.

use async_trait::async_trait;
use duel_referee_core::{DuelStore, PersistenceError, StoreSnapshot};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    snapshot: StoreSnapshot,
    fail_saves: bool,
    saves: usize,
}

/// Volatile store.
///
/// Clones share one snapshot, so a second referee built from a clone sees
/// what the first one saved, the way a restarted process sees its file.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent save fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.inner.lock().fail_saves = fail;
    }

    /// Number of successful saves so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.inner.lock().saves
    }

    /// Copy of the last saved snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.lock().snapshot.clone()
    }
}

#[async_trait]
impl DuelStore for MemoryStore {
    async fn load(&self) -> Result<StoreSnapshot, PersistenceError> {
        Ok(self.inner.lock().snapshot.clone())
    }

    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock();
        if inner.fail_saves {
            return Err(PersistenceError::Unavailable("memory store refusing writes".into()));
        }
        inner.snapshot = snapshot.clone();
        inner.saves += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
