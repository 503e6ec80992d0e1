//! JSON file store.
//!
//! The snapshot is one versioned document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "saved_at": "2025-01-01T00:00:00Z",
//!   "duels": { "0xd0e1": { ... } },
//!   "processed_events": ["9xQe...:0"]
//! }
//! ```
//!
//! Saves write a sibling temp file, fsync it, and rename it over the
//! target, so a crash leaves either the old or the new document. A file
//! that exists but cannot be read back is an error, never an empty state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duel_referee_core::{DuelId, DuelRecord, DuelStore, EventId, PersistenceError, StoreSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Document format written by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDocument {
    version: u32,
    saved_at: DateTime<Utc>,
    duels: BTreeMap<DuelId, DuelRecord>,
    processed_events: BTreeSet<EventId>,
}

#[derive(Debug, Deserialize)]
struct VersionHeader {
    version: u32,
}

/// Store backed by a single JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn load_blocking(&self) -> Result<StoreSnapshot, PersistenceError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No snapshot found, starting empty");
                return Ok(StoreSnapshot::default());
            }
            Err(e) => return Err(e.into()),
        };

        let header: VersionHeader = serde_json::from_slice(&bytes).map_err(PersistenceError::encoding)?;
        if header.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: header.version,
                supported: SNAPSHOT_VERSION,
            });
        }

        let document: SnapshotDocument =
            serde_json::from_slice(&bytes).map_err(PersistenceError::encoding)?;

        debug!(
            path = %self.path.display(),
            duels = document.duels.len(),
            processed = document.processed_events.len(),
            saved_at = %document.saved_at,
            "Snapshot loaded"
        );

        Ok(StoreSnapshot {
            duels: document.duels,
            processed: document.processed_events,
        })
    }

    fn save_blocking(&self, snapshot: StoreSnapshot) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let document = SnapshotDocument {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            duels: snapshot.duels,
            processed_events: snapshot.processed,
        };
        let bytes = serde_json::to_vec_pretty(&document).map_err(PersistenceError::encoding)?;

        let temp = self.temp_path();
        {
            let mut file = File::create(&temp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        sync_parent_dir(&self.path)?;

        debug!(
            path = %self.path.display(),
            duels = document.duels.len(),
            processed = document.processed_events.len(),
            bytes = bytes.len(),
            "Snapshot saved"
        );
        Ok(())
    }
}

/// Flushes the directory entry so the rename itself survives a crash.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => File::open(parent)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn join_error(e: tokio::task::JoinError) -> PersistenceError {
    PersistenceError::Io(io::Error::other(e))
}

#[async_trait]
impl DuelStore for JsonFileStore {
    async fn load(&self) -> Result<StoreSnapshot, PersistenceError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.load_blocking())
            .await
            .map_err(join_error)?
    }

    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        let store = self.clone();
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || store.save_blocking(snapshot))
            .await
            .map_err(join_error)?
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}
