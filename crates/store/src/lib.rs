//! Durable state for the duel referee.
//!
//! Three [`DuelStore`] backends share one contract: `load` returns the last
//! complete snapshot (empty on first run, an error if the stored state
//! cannot be trusted) and `save` replaces it atomically.

pub mod json;
pub mod lease;
pub mod memory;
pub mod sqlite;

pub use json::{JsonFileStore, SNAPSHOT_VERSION};
pub use lease::{InstanceLease, LeaseError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use duel_referee_core::{DuelStore, PersistenceError, StoreBackend, StoreConfig};
use std::sync::Arc;

/// Opens the backend named in the `[store]` section.
///
/// # Errors
///
/// Returns error if the `SQLite` database cannot be opened or migrated.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn DuelStore>, PersistenceError> {
    let store: Arc<dyn DuelStore> = match config.backend {
        StoreBackend::Json => Arc::new(JsonFileStore::new(&config.path)),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&config.path).await?),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };
    tracing::info!(store = %store.describe(), "State store opened");
    Ok(store)
}
