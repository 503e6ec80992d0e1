//! Startup reconciliation.
//!
//! While the referee was down, duels may have been joined (and their join
//! events pushed out of the steady-state window) or settled by someone
//! else. Recovery walks a wider window once, asks the ledger for each
//! unknown duel's status, and only ever adds `Active` duels.

use duel_referee_core::{
    Clock, DuelId, DuelRecord, LedgerGateway, LedgerResult, OnChainStatus, RecordOrigin,
};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{error, info, warn};

use crate::book::DuelBook;
use crate::gateway::fetch_balances;

/// Counters for one recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Duels tracked in the loaded snapshot.
    pub loaded: usize,
    /// Unconsumed events for untracked duels that were checked.
    pub examined: usize,
    /// Active duels added.
    pub recovered: usize,
    /// Events consumed because their duel is already resolved or cancelled.
    pub skipped_settled: usize,
    /// Events left alone because their duel is open or missing.
    pub skipped_not_active: usize,
    /// Events whose status or balance fetch failed.
    pub failed: usize,
}

/// Reconciles the book against the ledger's recent join events.
///
/// A failing event query leaves the book as loaded; the steady-state poll
/// picks the events up later.
pub async fn reconcile<G, C>(
    book: &mut DuelBook,
    gateway: &G,
    clock: &C,
    page_size: usize,
) -> RecoveryReport
where
    G: LedgerGateway + ?Sized,
    C: Clock + ?Sized,
{
    let mut report = RecoveryReport {
        loaded: book.len(),
        ..RecoveryReport::default()
    };

    let events = match gateway.query_join_events(page_size).await {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "Recovery event query failed, continuing with loaded state");
            return report;
        }
    };

    let mut statuses: HashMap<DuelId, LedgerResult<OnChainStatus>> = HashMap::new();

    for event in events.into_iter().rev() {
        if book.is_processed(&event.event_id) {
            continue;
        }
        if book.contains(&event.duel_id) {
            book.mark_processed(event.event_id);
            continue;
        }

        report.examined += 1;

        if !statuses.contains_key(&event.duel_id) {
            let status = gateway.get_duel_status(&event.duel_id).await;
            statuses.insert(event.duel_id.clone(), status);
        }
        let status = match statuses.get(&event.duel_id) {
            Some(Ok(status)) => *status,
            Some(Err(e)) => {
                warn!(duel_id = %event.duel_id, error = %e, "Status fetch failed during recovery");
                report.failed += 1;
                continue;
            }
            None => continue,
        };

        match status {
            OnChainStatus::Active => {
                let (creator_start, opponent_start) =
                    match fetch_balances(gateway, &event.creator, &event.opponent).await {
                        Ok(balances) => balances,
                        Err(e) => {
                            warn!(
                                duel_id = %event.duel_id,
                                error = %e,
                                "Balance fetch failed during recovery"
                            );
                            report.failed += 1;
                            continue;
                        }
                    };

                let now_ms = clock.now_ms();
                let record = DuelRecord::from_join(
                    &event,
                    creator_start,
                    opponent_start,
                    RecordOrigin::Recovery,
                    clock.now(),
                );
                match book.track(record) {
                    Ok(_) => {
                        warn!(
                            duel_id = %event.duel_id,
                            creator_start = %creator_start,
                            opponent_start = %opponent_start,
                            lag_ms = now_ms.saturating_sub(event.start_time_ms),
                            "Recovered active duel; start balances captured at discovery, not at join"
                        );
                        book.mark_processed(event.event_id);
                        report.recovered += 1;
                    }
                    Err(violation) => {
                        error!(duel_id = %event.duel_id, error = %violation, "Refusing to modify tracked duel");
                        report.failed += 1;
                    }
                }
            }
            OnChainStatus::Resolved | OnChainStatus::Cancelled => {
                book.mark_processed(event.event_id);
                report.skipped_settled += 1;
            }
            OnChainStatus::Open | OnChainStatus::NotFound => {
                report.skipped_not_active += 1;
            }
        }
    }

    info!(?report, "Recovery complete");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use duel_referee_core::{
        AccountId, Balance, EventId, JoinEvent, LedgerError, ManualClock, SettlementRequest,
        TxDigest,
    };
    use parking_lot::Mutex;

    struct StatusLedger {
        events: LedgerResult<Vec<JoinEvent>>,
        statuses: HashMap<DuelId, OnChainStatus>,
        status_calls: Mutex<usize>,
    }

    #[async_trait]
    impl LedgerGateway for StatusLedger {
        async fn query_join_events(&self, _limit: usize) -> LedgerResult<Vec<JoinEvent>> {
            self.events.clone()
        }

        async fn get_balance(&self, _account: &AccountId) -> LedgerResult<Balance> {
            Ok(Balance::new(500))
        }

        async fn get_duel_status(&self, duel_id: &DuelId) -> LedgerResult<OnChainStatus> {
            *self.status_calls.lock() += 1;
            self.statuses
                .get(duel_id)
                .copied()
                .ok_or_else(|| LedgerError::transient("object lookup failed"))
        }

        async fn submit_settlement(&self, _request: &SettlementRequest) -> LedgerResult<TxDigest> {
            Err(LedgerError::submission("unused"))
        }
    }

    fn join(digest: &str, duel: &str) -> JoinEvent {
        JoinEvent {
            event_id: EventId::new(digest, 0).unwrap(),
            duel_id: DuelId::parse(duel).unwrap(),
            creator: AccountId::parse("0xa1").unwrap(),
            opponent: AccountId::parse("0xb1").unwrap(),
            start_time_ms: 1_000,
            duration_ms: 300_000,
        }
    }

    fn duel(raw: &str) -> DuelId {
        DuelId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_only_active_duels_are_recovered() {
        let gateway = StatusLedger {
            events: Ok(vec![
                join("DigestD", "0xd4"),
                join("DigestC", "0xd3"),
                join("DigestB", "0xd2"),
                join("DigestA", "0xd1"),
            ]),
            statuses: HashMap::from([
                (duel("0xd1"), OnChainStatus::Active),
                (duel("0xd2"), OnChainStatus::Resolved),
                (duel("0xd3"), OnChainStatus::Cancelled),
                (duel("0xd4"), OnChainStatus::Open),
            ]),
            status_calls: Mutex::new(0),
        };
        let mut book = DuelBook::new();
        let clock = ManualClock::at_ms(61_000);

        let report = reconcile(&mut book, &gateway, &clock, 200).await;

        assert_eq!(report.recovered, 1);
        assert_eq!(report.skipped_settled, 2);
        assert_eq!(report.skipped_not_active, 1);
        assert_eq!(book.len(), 1);
        let record = book.get(&duel("0xd1")).unwrap();
        assert_eq!(record.origin(), RecordOrigin::Recovery);
        assert_eq!(record.creator_start_balance(), Balance::new(500));

        assert!(book.is_processed(&EventId::new("DigestB", 0).unwrap()));
        assert!(!book.is_processed(&EventId::new("DigestD", 0).unwrap()));
    }

    #[tokio::test]
    async fn test_status_is_fetched_once_per_duel() {
        let gateway = StatusLedger {
            events: Ok(vec![join("DigestB", "0xd1"), join("DigestA", "0xd1")]),
            statuses: HashMap::from([(duel("0xd1"), OnChainStatus::Resolved)]),
            status_calls: Mutex::new(0),
        };
        let mut book = DuelBook::new();

        let report = reconcile(&mut book, &gateway, &ManualClock::at_ms(0), 200).await;

        assert_eq!(report.skipped_settled, 2);
        assert_eq!(*gateway.status_calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_one_failed_status_does_not_abort_others() {
        let gateway = StatusLedger {
            events: Ok(vec![join("DigestB", "0xd2"), join("DigestA", "0xd1")]),
            statuses: HashMap::from([(duel("0xd2"), OnChainStatus::Active)]),
            status_calls: Mutex::new(0),
        };
        let mut book = DuelBook::new();

        let report = reconcile(&mut book, &gateway, &ManualClock::at_ms(0), 200).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.recovered, 1);
        assert!(book.contains(&duel("0xd2")));
    }

    #[tokio::test]
    async fn test_query_failure_keeps_loaded_state() {
        let gateway = StatusLedger {
            events: Err(LedgerError::transient("503")),
            statuses: HashMap::new(),
            status_calls: Mutex::new(0),
        };
        let mut book = DuelBook::new();

        let report = reconcile(&mut book, &gateway, &ManualClock::at_ms(0), 200).await;

        assert_eq!(report, RecoveryReport::default());
        assert!(!book.is_dirty());
    }
}
