//! SQLite-backed duel store.
//!
//! Schema lives in `migrations/`. Each save replaces both tables inside one
//! transaction, so a reader never sees a half-written snapshot.

use async_trait::async_trait;
use chrono::Utc;
use duel_referee_core::{DuelId, DuelRecord, DuelStore, EventId, PersistenceError, StoreSnapshot};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::debug;

use crate::json::SNAPSHOT_VERSION;

/// `SQLite` store for tracked duels and consumed event ids.
///
/// Each save replaces both tables inside one transaction. Records are kept
/// as JSON text so balances and timestamps keep their full `u64` range.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    location: String,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens (creating if missing) the database file and runs migrations.
    ///
    /// # Errors
    ///
    /// Returns error if the connection or a migration fails.
    pub async fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(PersistenceError::database)?;

        Self::with_pool(pool, format!("sqlite:{}", path.display())).await
    }

    /// Creates an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns error if connection fails.
    #[cfg(test)]
    pub async fn new_in_memory() -> Result<Self, PersistenceError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(PersistenceError::database)?;

        Self::with_pool(pool, "sqlite::memory:".to_string()).await
    }

    async fn with_pool(pool: SqlitePool, location: String) -> Result<Self, PersistenceError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(PersistenceError::database)?;

        Ok(Self { pool, location })
    }

    async fn read_snapshot(&self) -> Result<StoreSnapshot, PersistenceError> {
        let version = sqlx::query_as::<_, (i64,)>("SELECT version FROM snapshot_meta WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(PersistenceError::database)?;

        if let Some((found,)) = version {
            if found != i64::from(SNAPSHOT_VERSION) {
                return Err(PersistenceError::UnsupportedVersion {
                    found: u32::try_from(found).unwrap_or(u32::MAX),
                    supported: SNAPSHOT_VERSION,
                });
            }
        }

        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT duel_id, record_json FROM tracked_duels ORDER BY duel_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::database)?;

        let mut snapshot = StoreSnapshot::default();
        for (duel_id, record_json) in rows {
            let key = DuelId::parse(&duel_id).map_err(PersistenceError::encoding)?;
            let record: DuelRecord =
                serde_json::from_str(&record_json).map_err(PersistenceError::encoding)?;
            snapshot.duels.insert(key, record);
        }

        let events = sqlx::query_as::<_, (String,)>("SELECT event_id FROM processed_events")
            .fetch_all(&self.pool)
            .await
            .map_err(PersistenceError::database)?;

        for (event_id,) in events {
            let id: EventId = event_id.parse().map_err(PersistenceError::encoding)?;
            snapshot.processed.insert(id);
        }

        Ok(snapshot)
    }

    async fn write_snapshot(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(PersistenceError::database)?;

        sqlx::query("DELETE FROM tracked_duels")
            .execute(&mut *tx)
            .await
            .map_err(PersistenceError::database)?;

        for (duel_id, record) in &snapshot.duels {
            let record_json = serde_json::to_string(record).map_err(PersistenceError::encoding)?;
            sqlx::query(
                "INSERT INTO tracked_duels (duel_id, record_json, updated_at) VALUES (?1, ?2, ?3)",
            )
            .bind(duel_id.as_str())
            .bind(record_json)
            .bind(now.timestamp())
            .execute(&mut *tx)
            .await
            .map_err(PersistenceError::database)?;
        }

        sqlx::query("DELETE FROM processed_events")
            .execute(&mut *tx)
            .await
            .map_err(PersistenceError::database)?;

        for event_id in &snapshot.processed {
            sqlx::query("INSERT INTO processed_events (event_id) VALUES (?1)")
                .bind(event_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(PersistenceError::database)?;
        }

        sqlx::query(
            r"
            INSERT INTO snapshot_meta (id, version, saved_at)
            VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                saved_at = excluded.saved_at
            ",
        )
        .bind(i64::from(SNAPSHOT_VERSION))
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(PersistenceError::database)?;

        tx.commit().await.map_err(PersistenceError::database)?;

        debug!(
            location = %self.location,
            duels = snapshot.duels.len(),
            processed = snapshot.processed.len(),
            "Snapshot saved"
        );
        Ok(())
    }
}

#[async_trait]
impl DuelStore for SqliteStore {
    async fn load(&self) -> Result<StoreSnapshot, PersistenceError> {
        self.read_snapshot().await
    }

    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        self.write_snapshot(snapshot).await
    }

    fn describe(&self) -> String {
        self.location.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duel_referee_core::{AccountId, Balance, JoinEvent, RecordOrigin};
    use tempfile::TempDir;

    fn record(duel: &str, creator_start: u64) -> DuelRecord {
        let event = JoinEvent {
            event_id: EventId::new("Digest", 0).unwrap(),
            duel_id: DuelId::parse(duel).unwrap(),
            creator: AccountId::parse("0xc1").unwrap(),
            opponent: AccountId::parse("0x0b").unwrap(),
            start_time_ms: 1_700_000_000_000,
            duration_ms: 600_000,
        };
        DuelRecord::from_join(
            &event,
            Balance::new(creator_start),
            Balance::new(1000),
            RecordOrigin::JoinEvent,
            Utc::now(),
        )
    }

    fn snapshot() -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::default();
        for r in [record("0xd1", u64::MAX), record("0xd2", 5)] {
            snapshot.duels.insert(r.duel_id().clone(), r);
        }
        snapshot.processed.insert(EventId::new("DigestA", 0).unwrap());
        snapshot.processed.insert(EventId::new("DigestA", 1).unwrap());
        snapshot
    }

    #[tokio::test]
    async fn test_empty_database_loads_empty() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let original = snapshot();

        store.save(&original).await.unwrap();
        assert_eq!(store.load().await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_save_replaces_removed_duels() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let mut state = snapshot();
        store.save(&state).await.unwrap();

        state.duels.remove(&DuelId::parse("0xd1").unwrap());
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.duels.len(), 1);
        assert_eq!(loaded.processed.len(), 2);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("referee.db");
        let original = snapshot();

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.save(&original).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).await.unwrap();
        assert_eq!(reopened.load().await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_unknown_version_fails_closed() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        store.save(&snapshot()).await.unwrap();
        sqlx::query("UPDATE snapshot_meta SET version = 9 WHERE id = 1")
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, PersistenceError::UnsupportedVersion { found: 9, .. }));
    }
}
