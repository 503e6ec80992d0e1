//! Join event ingestion.
//!
//! Turns a page of join events into tracked duels. Each event is handled on
//! its own: one failing balance fetch leaves that event unconsumed for the
//! next poll without holding back the rest of the batch.

use duel_referee_core::{Clock, DuelRecord, JoinEvent, LedgerGateway, RecordOrigin};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::book::DuelBook;
use crate::gateway::fetch_balances;

/// Counters for one ingestion batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Events returned by the ledger.
    pub fetched: usize,
    /// Events already consumed in an earlier batch.
    pub duplicates: usize,
    /// Events for a duel that was already tracked.
    pub already_tracked: usize,
    /// New records created.
    pub created: usize,
    /// Events left unconsumed because a fetch or invariant check failed.
    pub failed: usize,
}

/// Applies a batch of join events to the book.
///
/// Events arrive newest first; they are applied oldest first so the
/// earliest event for a duel is the one that creates its record.
pub async fn ingest_events<G, C>(
    book: &mut DuelBook,
    gateway: &G,
    clock: &C,
    events: Vec<JoinEvent>,
) -> IngestReport
where
    G: LedgerGateway + ?Sized,
    C: Clock + ?Sized,
{
    let mut report = IngestReport {
        fetched: events.len(),
        ..IngestReport::default()
    };

    for event in events.into_iter().rev() {
        if book.is_processed(&event.event_id) {
            report.duplicates += 1;
            continue;
        }

        if book.contains(&event.duel_id) {
            debug!(
                duel_id = %event.duel_id,
                event_id = %event.event_id,
                "Duel already tracked, consuming event without re-capture"
            );
            book.mark_processed(event.event_id);
            report.already_tracked += 1;
            continue;
        }

        let (creator_start, opponent_start) =
            match fetch_balances(gateway, &event.creator, &event.opponent).await {
                Ok(balances) => balances,
                Err(e) => {
                    warn!(
                        duel_id = %event.duel_id,
                        event_id = %event.event_id,
                        error = %e,
                        "Start balance fetch failed, event left for next poll"
                    );
                    report.failed += 1;
                    continue;
                }
            };

        let record = DuelRecord::from_join(
            &event,
            creator_start,
            opponent_start,
            RecordOrigin::JoinEvent,
            clock.now(),
        );

        match book.track(record) {
            Ok(_) => {
                info!(
                    duel_id = %event.duel_id,
                    creator = %event.creator.short(),
                    opponent = %event.opponent.short(),
                    creator_start = %creator_start,
                    opponent_start = %opponent_start,
                    expiry_ms = event.start_time_ms.saturating_add(event.duration_ms),
                    "Tracking duel"
                );
                book.mark_processed(event.event_id);
                report.created += 1;
            }
            Err(violation) => {
                error!(
                    duel_id = %event.duel_id,
                    event_id = %event.event_id,
                    error = %violation,
                    "Refusing to modify tracked duel"
                );
                report.failed += 1;
            }
        }
    }

    if report.created > 0 {
        info!(?report, "Ingestion batch applied");
    } else {
        debug!(?report, "Ingestion batch applied");
    }

    report
}
