//! The referee actor.
//!
//! One `Referee` owns the [`DuelBook`] and is the only writer of it. Tickers
//! and operators talk to it through a [`RefereeHandle`](crate::RefereeHandle);
//! commands run one at a time, so ingestion, expiry scans, and saves never
//! interleave.

use chrono::{DateTime, Utc};
use duel_referee_core::{
    Clock, DuelStore, IngestionConfig, LedgerGateway, PersistenceError, StateInvariantViolation,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::book::DuelBook;
use crate::commands::{RefereeCommand, Tick};
use crate::handle::CommandReceiver;
use crate::ingestion::{ingest_events, IngestReport};
use crate::recovery::{reconcile, RecoveryReport};
use crate::resolver::{resolve_due, ResolutionReport};
use crate::settlement::SettlementSubmitter;
use crate::status::{DuelSummary, RefereeStatus};

/// Startup failures. Anything after startup is logged and retried instead.
#[derive(Debug, Error)]
pub enum RefereeError {
    /// The store could not produce a trustworthy snapshot.
    #[error("failed to load duel state from {store}: {source}")]
    Load {
        store: String,
        #[source]
        source: PersistenceError,
    },

    /// The loaded snapshot breaks a per-duel invariant.
    #[error("loaded duel state is inconsistent: {0}")]
    Invariant(#[from] StateInvariantViolation),
}

/// Ledger query sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefereeSettings {
    pub event_page_size: usize,
    pub recovery_page_size: usize,
}

impl Default for RefereeSettings {
    fn default() -> Self {
        Self::from(&IngestionConfig::default())
    }
}

impl From<&IngestionConfig> for RefereeSettings {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            event_page_size: config.event_page_size,
            recovery_page_size: config.recovery_page_size,
        }
    }
}

#[derive(Debug)]
struct PersistenceHealth {
    healthy: bool,
    last_error: Option<String>,
    last_saved_at: Option<DateTime<Utc>>,
}

impl Default for PersistenceHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            last_error: None,
            last_saved_at: None,
        }
    }
}

pub struct Referee<G, S, C> {
    book: DuelBook,
    gateway: G,
    store: S,
    clock: C,
    submitter: SettlementSubmitter,
    settings: RefereeSettings,
    persistence: PersistenceHealth,
    fence: Arc<AtomicBool>,
}

impl<G, S, C> Referee<G, S, C>
where
    G: LedgerGateway,
    S: DuelStore,
    C: Clock,
{
    /// Creates a referee with an empty book. Call [`start`](Self::start)
    /// before processing commands.
    pub fn new(gateway: G, store: S, clock: C, settings: RefereeSettings) -> Self {
        Self {
            book: DuelBook::new(),
            gateway,
            store,
            clock,
            submitter: SettlementSubmitter::new(),
            settings,
            persistence: PersistenceHealth::default(),
            fence: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub const fn book(&self) -> &DuelBook {
        &self.book
    }

    /// Flag that, once set, stops all further settlements and saves.
    ///
    /// Set by the lease keeper when another instance has taken over.
    #[must_use]
    pub fn fence(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fence)
    }

    fn is_fenced(&self) -> bool {
        self.fence.load(Ordering::SeqCst)
    }

    /// Loads persisted state, reconciles it against the ledger, and saves.
    ///
    /// # Errors
    /// Fails closed if the store cannot be read or holds inconsistent
    /// records; the referee must not run without its start snapshots.
    pub async fn start(&mut self) -> Result<RecoveryReport, RefereeError> {
        let snapshot = self.store.load().await.map_err(|source| RefereeError::Load {
            store: self.store.describe(),
            source,
        })?;
        self.book = DuelBook::from_snapshot(snapshot)?;

        info!(
            store = %self.store.describe(),
            tracked = self.book.len(),
            processed = self.book.processed_len(),
            "Duel state loaded"
        );

        let report = reconcile(
            &mut self.book,
            &self.gateway,
            &self.clock,
            self.settings.recovery_page_size,
        )
        .await;
        self.persist().await;
        Ok(report)
    }

    /// Polls the ledger for join events and applies them.
    pub async fn ingest(&mut self) -> IngestReport {
        let events = match self
            .gateway
            .query_join_events(self.settings.event_page_size)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Join event poll failed");
                return IngestReport::default();
            }
        };

        let report = ingest_events(&mut self.book, &self.gateway, &self.clock, events).await;
        if self.book.is_dirty() {
            self.persist().await;
        }
        report
    }

    /// Settles every duel whose window has closed, oldest expiry first.
    ///
    /// Each settled duel is dropped and saved before the next submission.
    pub async fn resolve_expired(&mut self) -> ResolutionReport {
        let due = self.book.due(self.clock.now_ms());
        let mut report = ResolutionReport {
            due: due.len(),
            ..ResolutionReport::default()
        };

        for record in due {
            if self.is_fenced() {
                warn!(
                    duel_id = %record.duel_id(),
                    "Instance lease lost, not settling"
                );
                break;
            }

            let resolution = resolve_due(&record, &self.gateway, &mut self.submitter).await;
            report.record(&resolution);

            if resolution.is_terminal() {
                self.book.settle(record.duel_id());
                self.submitter.forget(record.duel_id());
                self.persist().await;
            }
        }

        if report.due > 0 {
            info!(?report, "Expiry scan complete");
        }
        report
    }

    /// Saves the book if it changed since the last successful save.
    ///
    /// A failed save keeps the changes pending and marks the store
    /// unhealthy; the next call retries. Returns true if nothing is left
    /// unsaved.
    pub async fn persist(&mut self) -> bool {
        if !self.book.is_dirty() {
            return true;
        }
        if self.is_fenced() {
            warn!("Instance lease lost, not saving duel state");
            return false;
        }

        match self.store.save(&self.book.snapshot()).await {
            Ok(()) => {
                self.book.mark_clean();
                if !self.persistence.healthy {
                    info!(store = %self.store.describe(), "Duel state store recovered");
                }
                self.persistence = PersistenceHealth {
                    healthy: true,
                    last_error: None,
                    last_saved_at: Some(self.clock.now()),
                };
                debug!(tracked = self.book.len(), "Duel state saved");
                true
            }
            Err(e) => {
                error!(
                    store = %self.store.describe(),
                    error = %e,
                    tracked = self.book.len(),
                    "Failed to save duel state, keeping changes in memory"
                );
                self.persistence.healthy = false;
                self.persistence.last_error = Some(e.to_string());
                false
            }
        }
    }

    #[must_use]
    pub fn status(&self) -> RefereeStatus {
        let now_ms = self.clock.now_ms();
        let duels: Vec<DuelSummary> = self
            .book
            .records()
            .map(|r| DuelSummary::from_record(r, now_ms, self.submitter.attempts(r.duel_id())))
            .collect();

        RefereeStatus {
            store: self.store.describe(),
            tracked: self.book.len(),
            due: duels.iter().filter(|d| d.remaining_ms <= 0).count(),
            processed_events: self.book.processed_len(),
            pending_retries: self.submitter.pending(),
            persistence_healthy: self.persistence.healthy,
            last_persist_error: self.persistence.last_error.clone(),
            last_persisted_at: self.persistence.last_saved_at,
            unsaved_changes: self.book.is_dirty(),
            fenced: self.is_fenced(),
            duels,
        }
    }

    pub async fn handle_tick(&mut self, tick: Tick) {
        match tick {
            Tick::Ingest => {
                self.ingest().await;
            }
            Tick::ExpiryScan => {
                self.resolve_expired().await;
            }
            Tick::Persist => {
                self.persist().await;
            }
        }
    }

    /// Processes commands until shutdown, then saves once more.
    pub async fn run(mut self, mut commands: CommandReceiver) -> RefereeStatus {
        info!(tracked = self.book.len(), "Referee running");

        while let Some(cmd) = commands.recv().await {
            match cmd {
                RefereeCommand::Tick(tick) => self.handle_tick(tick).await,
                RefereeCommand::GetStatus(tx) => {
                    let _ = tx.send(self.status());
                }
                RefereeCommand::Shutdown => {
                    info!("Referee shutting down");
                    break;
                }
            }
        }

        if !self.persist().await {
            warn!(
                tracked = self.book.len(),
                "Final save failed; unsaved changes will be rebuilt by recovery on next start"
            );
        }
        self.status()
    }
}
