//! Single-instance lease.
//!
//! Two referees settling the same duels would race each other. The lease is
//! a small file naming the current owner and its last heartbeat; a second
//! process refuses to start while the heartbeat is fresh.
//!
//! This guards one host or one shared volume. It is not a distributed lock.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lease failures.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// Another live process holds the lease.
    #[error("lease held by {owner} (pid {pid}), last heartbeat {age_ms} ms ago")]
    Held {
        /// Owner token of the holder.
        owner: String,
        /// Process id of the holder.
        pid: u32,
        /// Age of the holder's heartbeat.
        age_ms: u64,
    },

    /// The lease file now names another owner.
    #[error("lease lost to {owner}")]
    Lost {
        /// Owner token found in the file.
        owner: String,
    },

    /// IO error reading/writing the lease file.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Lease record could not be encoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LeaseRecord {
    owner: String,
    pid: u32,
    heartbeat_ms: u64,
}

/// File-based lease owned by this process.
#[derive(Debug, Clone)]
pub struct InstanceLease {
    path: PathBuf,
    owner: String,
    ttl: Duration,
}

impl InstanceLease {
    /// Creates a lease handle with a fresh owner token. Nothing is written
    /// until [`acquire`](Self::acquire).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            owner: Uuid::new_v4().to_string(),
            ttl,
        }
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Interval at which the holder should renew.
    #[must_use]
    pub fn renew_interval(&self) -> Duration {
        (self.ttl / 3).max(Duration::from_secs(1))
    }

    fn ttl_ms(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX)
    }

    /// Takes the lease if it is free, stale, or already ours.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Held`] if another owner's heartbeat is younger
    /// than the TTL, or lost the race to write the file.
    pub fn acquire(&self, now_ms: u64) -> Result<(), LeaseError> {
        if let Some(existing) = self.read()? {
            let age_ms = now_ms.saturating_sub(existing.heartbeat_ms);
            if existing.owner != self.owner && age_ms <= self.ttl_ms() {
                return Err(LeaseError::Held {
                    owner: existing.owner,
                    pid: existing.pid,
                    age_ms,
                });
            }
            if existing.owner != self.owner {
                warn!(
                    stale_owner = %existing.owner,
                    stale_pid = existing.pid,
                    age_ms,
                    "Taking over stale lease"
                );
            }
        }

        self.write(now_ms)?;

        match self.read()? {
            Some(record) if record.owner == self.owner => {
                info!(path = %self.path.display(), owner = %self.owner, "Lease acquired");
                Ok(())
            }
            Some(record) => Err(LeaseError::Held {
                owner: record.owner,
                pid: record.pid,
                age_ms: now_ms.saturating_sub(record.heartbeat_ms),
            }),
            None => Err(LeaseError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "lease file vanished after write",
            ))),
        }
    }

    /// Refreshes the heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Lost`] if the file names another owner or is gone.
    pub fn renew(&self, now_ms: u64) -> Result<(), LeaseError> {
        match self.read()? {
            Some(record) if record.owner == self.owner => {
                self.write(now_ms)?;
                debug!(owner = %self.owner, "Lease renewed");
                Ok(())
            }
            Some(record) => Err(LeaseError::Lost {
                owner: record.owner,
            }),
            None => Err(LeaseError::Lost {
                owner: "<none>".to_string(),
            }),
        }
    }

    /// Removes the lease file if it is still ours.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or removed.
    pub fn release(&self) -> Result<(), LeaseError> {
        match self.read()? {
            Some(record) if record.owner == self.owner => {
                fs::remove_file(&self.path)?;
                info!(path = %self.path.display(), "Lease released");
            }
            Some(record) => {
                warn!(owner = %record.owner, "Lease owned by another process, leaving it");
            }
            None => {}
        }
        Ok(())
    }

    fn read(&self) -> Result<Option<LeaseRecord>, LeaseError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // A torn or foreign file carries no live heartbeat.
                warn!(path = %self.path.display(), error = %e, "Unreadable lease file treated as free");
                Ok(None)
            }
        }
    }

    fn write(&self, now_ms: u64) -> Result<(), LeaseError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let record = LeaseRecord {
            owner: self.owner.clone(),
            pid: std::process::id(),
            heartbeat_ms: now_ms,
        };

        let mut temp_name = self.path.as_os_str().to_os_string();
        temp_name.push(format!(".{}.tmp", self.owner));
        let temp = PathBuf::from(temp_name);

        fs::write(&temp, serde_json::to_vec(&record)?)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}
