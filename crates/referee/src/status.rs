//! Serializable snapshot of the referee for operators.

use chrono::{DateTime, Utc};
use duel_referee_core::{DuelRecord, RecordOrigin};
use serde::Serialize;

use crate::resolver::DuelPhase;

/// One tracked duel as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuelSummary {
    pub duel_id: String,
    pub creator: String,
    pub opponent: String,
    pub creator_start_balance: String,
    pub opponent_start_balance: String,
    pub expiry_ms: u64,
    /// Milliseconds until expiry; negative once overdue.
    pub remaining_ms: i64,
    pub phase: DuelPhase,
    pub failed_attempts: u32,
    pub origin: RecordOrigin,
}

impl DuelSummary {
    #[must_use]
    pub fn from_record(record: &DuelRecord, now_ms: u64, failed_attempts: u32) -> Self {
        let expiry_ms = record.expiry_ms();
        let remaining_ms = i128::from(expiry_ms) - i128::from(now_ms);
        Self {
            duel_id: record.duel_id().to_string(),
            creator: record.creator().to_string(),
            opponent: record.opponent().to_string(),
            creator_start_balance: record.creator_start_balance().to_string(),
            opponent_start_balance: record.opponent_start_balance().to_string(),
            expiry_ms,
            remaining_ms: i64::try_from(remaining_ms).unwrap_or(if remaining_ms < 0 {
                i64::MIN
            } else {
                i64::MAX
            }),
            phase: DuelPhase::of(record, now_ms, failed_attempts),
            failed_attempts,
            origin: record.origin(),
        }
    }
}

/// Snapshot of the referee's state.
#[derive(Debug, Clone, Serialize)]
pub struct RefereeStatus {
    pub store: String,
    pub tracked: usize,
    pub due: usize,
    pub processed_events: usize,
    pub pending_retries: usize,
    /// True if the last save succeeded (or nothing needed saving yet).
    pub persistence_healthy: bool,
    pub last_persist_error: Option<String>,
    pub last_persisted_at: Option<DateTime<Utc>>,
    pub unsaved_changes: bool,
    /// Set once the instance lease was lost; no further settlements go out.
    pub fenced: bool,
    pub duels: Vec<DuelSummary>,
}
