//! In-memory state owned by the referee actor.
//!
//! The book is the only writer of tracked duels and consumed event ids.
//! Every mutation goes through [`DuelBook::track`], [`DuelBook::mark_processed`]
//! or [`DuelBook::settle`], which keep the per-duel invariants and set the
//! dirty flag that drives persistence.

use duel_referee_core::{DuelId, DuelRecord, EventId, StateInvariantViolation, StoreSnapshot};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct DuelBook {
    duels: BTreeMap<DuelId, DuelRecord>,
    processed: BTreeSet<EventId>,
    dirty: bool,
}

impl DuelBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the book from a stored snapshot.
    ///
    /// # Errors
    /// Returns [`StateInvariantViolation::KeyMismatch`] if a record is filed
    /// under another duel's id.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self, StateInvariantViolation> {
        for (key, record) in &snapshot.duels {
            if key != record.duel_id() {
                return Err(StateInvariantViolation::KeyMismatch {
                    key: key.to_string(),
                    record: record.duel_id().to_string(),
                });
            }
        }
        Ok(Self {
            duels: snapshot.duels,
            processed: snapshot.processed,
            dirty: false,
        })
    }

    /// Copy of the full state for the store.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            duels: self.duels.clone(),
            processed: self.processed.clone(),
        }
    }

    #[must_use]
    pub fn is_processed(&self, event_id: &EventId) -> bool {
        self.processed.contains(event_id)
    }

    /// Records an event as consumed. Returns false if it already was.
    pub fn mark_processed(&mut self, event_id: EventId) -> bool {
        let inserted = self.processed.insert(event_id);
        self.dirty |= inserted;
        inserted
    }

    #[must_use]
    pub fn contains(&self, duel_id: &DuelId) -> bool {
        self.duels.contains_key(duel_id)
    }

    #[must_use]
    pub fn get(&self, duel_id: &DuelId) -> Option<&DuelRecord> {
        self.duels.get(duel_id)
    }

    /// Starts tracking a duel.
    ///
    /// Re-submitting an identical record is a no-op and returns `Ok(false)`.
    ///
    /// # Errors
    /// Refuses to replace a stored record's participants, window, or start
    /// balances; the stored record is left untouched.
    pub fn track(&mut self, record: DuelRecord) -> Result<bool, StateInvariantViolation> {
        if let Some(existing) = self.duels.get(record.duel_id()) {
            if !existing.same_binding(&record) {
                return Err(StateInvariantViolation::ParticipantRebind {
                    duel_id: record.duel_id().to_string(),
                });
            }
            if existing.creator_start_balance() != record.creator_start_balance()
                || existing.opponent_start_balance() != record.opponent_start_balance()
            {
                return Err(StateInvariantViolation::StartBalanceOverwrite {
                    duel_id: record.duel_id().to_string(),
                    stored_creator: existing.creator_start_balance().get(),
                    stored_opponent: existing.opponent_start_balance().get(),
                    attempted_creator: record.creator_start_balance().get(),
                    attempted_opponent: record.opponent_start_balance().get(),
                });
            }
            return Ok(false);
        }

        self.duels.insert(record.duel_id().clone(), record);
        self.dirty = true;
        Ok(true)
    }

    /// Stops tracking a settled duel.
    pub fn settle(&mut self, duel_id: &DuelId) -> Option<DuelRecord> {
        let removed = self.duels.remove(duel_id);
        self.dirty |= removed.is_some();
        removed
    }

    /// Records whose window has closed at `now_ms`, oldest expiry first.
    #[must_use]
    pub fn due(&self, now_ms: u64) -> Vec<DuelRecord> {
        let mut due: Vec<DuelRecord> = self
            .duels
            .values()
            .filter(|r| r.is_due(now_ms))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.expiry_ms()
                .cmp(&b.expiry_ms())
                .then_with(|| a.duel_id().cmp(b.duel_id()))
        });
        due
    }

    pub fn records(&self) -> impl Iterator<Item = &DuelRecord> {
        self.duels.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.duels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.duels.is_empty()
    }

    #[must_use]
    pub fn processed_len(&self) -> usize {
        self.processed.len()
    }

    /// True if state changed since the last successful save.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
