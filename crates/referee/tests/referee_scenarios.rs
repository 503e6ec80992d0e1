//! End-to-end referee scenarios.
//!
//! These tests drive a referee against a scripted ledger, a shared memory
//! store, and a manual clock:
//! - settlement happens at most once across crash/restart
//! - start balances never change once captured
//! - repeated join events produce one record
//! - startup recovery adds only active duels
//! - expiry boundary, retries, rejections, and persistence failures

mod common;

use common::{account, duel, join_event, referee, ScriptedLedger};
use duel_referee_core::{
    Balance, LedgerError, ManualClock, OnChainStatus, RecordOrigin, TxDigest,
};
use duel_referee_engine::{channel, RefereeSettings, Referee, Tick, TimeoutGateway};
use duel_referee_store::MemoryStore;
use std::time::Duration;

const T0: u64 = 0;
const WINDOW: u64 = 300_000;

fn funded_ledger() -> ScriptedLedger {
    let ledger = ScriptedLedger::new();
    ledger.set_balance(&account("0xc1"), 1000);
    ledger.set_balance(&account("0x0b"), 1000);
    ledger
}

fn clock_at(ms: u64) -> ManualClock {
    ManualClock::at_ms(i64::try_from(ms).unwrap())
}

// =============================================================================
// Ingestion
// =============================================================================

#[tokio::test]
async fn test_repeated_delivery_creates_one_record() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);
    let mut referee = referee(&ledger, &store, &clock);
    referee.start().await.unwrap();

    let event = join_event("JoinDigest", "0xd1", "0xc1", "0x0b", T0, WINDOW);
    ledger.push_event(event);

    for _ in 0..5 {
        referee.ingest().await;
    }

    assert_eq!(referee.book().len(), 1);
    assert_eq!(referee.book().processed_len(), 1);
    assert_eq!(ledger.balance_calls(), 2);

    let saved = store.snapshot();
    assert_eq!(saved.duels.len(), 1);
    assert_eq!(saved.processed.len(), 1);
}

#[tokio::test]
async fn test_two_events_for_one_duel_in_one_batch() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);
    let mut referee = referee(&ledger, &store, &clock);
    referee.start().await.unwrap();

    ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
    ledger.push_event(join_event("JoinB", "0xd1", "0xc1", "0x0b", T0, WINDOW));

    let report = referee.ingest().await;

    assert_eq!(report.created, 1);
    assert_eq!(report.already_tracked, 1);
    assert_eq!(referee.book().len(), 1);
    assert_eq!(ledger.balance_calls(), 2);
}

#[tokio::test]
async fn test_start_balances_survive_redelivery_after_balance_change() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);
    let mut referee = referee(&ledger, &store, &clock);
    referee.start().await.unwrap();

    ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
    referee.ingest().await;

    // Balances move and the join event is delivered again under a new id.
    ledger.set_balance(&account("0xc1"), 5);
    ledger.set_balance(&account("0x0b"), 6);
    ledger.push_event(join_event("JoinB", "0xd1", "0xc1", "0x0b", T0, WINDOW));
    referee.ingest().await;

    let record = referee.book().get(&duel("0xd1")).unwrap();
    assert_eq!(record.creator_start_balance(), Balance::new(1000));
    assert_eq!(record.opponent_start_balance(), Balance::new(1000));
}

#[tokio::test]
async fn test_failed_balance_fetch_retried_next_poll() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);
    let mut referee = referee(&ledger, &store, &clock);
    referee.start().await.unwrap();

    ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
    ledger.fail_balances(true);
    let report = referee.ingest().await;
    assert_eq!(report.failed, 1);
    assert!(referee.book().is_empty());
    assert_eq!(referee.book().processed_len(), 0);

    ledger.fail_balances(false);
    let report = referee.ingest().await;
    assert_eq!(report.created, 1);
    assert_eq!(referee.book().processed_len(), 1);
}

#[tokio::test]
async fn test_event_query_failure_changes_nothing() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);
    let mut referee = referee(&ledger, &store, &clock);
    referee.start().await.unwrap();

    ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
    ledger.fail_event_queries(true);

    let report = referee.ingest().await;
    assert_eq!(report.fetched, 0);
    assert!(referee.book().is_empty());
    assert_eq!(store.save_count(), 0);
}

// =============================================================================
// Expiry & settlement
// =============================================================================

#[tokio::test]
async fn test_expiry_boundary() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);
    let mut referee = referee(&ledger, &store, &clock);
    referee.start().await.unwrap();

    ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
    referee.ingest().await;

    clock.set_ms(i64::try_from(T0 + WINDOW - 1).unwrap());
    let report = referee.resolve_expired().await;
    assert_eq!(report.due, 0);
    assert!(ledger.submissions().is_empty());

    clock.set_ms(i64::try_from(T0 + WINDOW).unwrap());
    let report = referee.resolve_expired().await;
    assert_eq!(report.due, 1);
    assert_eq!(report.settled, 1);
    assert_eq!(ledger.submissions().len(), 1);
}

#[tokio::test]
async fn test_settlement_carries_exact_balances() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);
    let mut referee = referee(&ledger, &store, &clock);
    referee.start().await.unwrap();

    ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
    referee.ingest().await;

    ledger.set_balance(&account("0xc1"), 1200);
    ledger.set_balance(&account("0x0b"), 900);
    clock.set_ms(i64::try_from(T0 + WINDOW).unwrap());
    referee.resolve_expired().await;

    let submissions = ledger.submissions();
    assert_eq!(submissions.len(), 1);
    let request = &submissions[0];
    assert_eq!(request.duel_id, duel("0xd1"));
    assert_eq!(request.creator_start, Balance::new(1000));
    assert_eq!(request.creator_end, Balance::new(1200));
    assert_eq!(request.opponent_start, Balance::new(1000));
    assert_eq!(request.opponent_end, Balance::new(900));

    assert!(referee.book().is_empty());
    assert!(store.snapshot().duels.is_empty());
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);
    let mut referee = referee(&ledger, &store, &clock);
    referee.start().await.unwrap();

    ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
    referee.ingest().await;
    ledger.script_settlements(vec![
        Err(LedgerError::submission("gateway 503")),
        Err(LedgerError::submission("gateway 503")),
        Ok(TxDigest("SettleOk".to_string())),
    ]);
    clock.set_ms(i64::try_from(T0 + WINDOW).unwrap());

    for attempt in 1..=2 {
        let report = referee.resolve_expired().await;
        assert_eq!(report.retry_pending, 1, "attempt {attempt}");
        assert!(referee.book().contains(&duel("0xd1")));
        assert!(store.snapshot().duels.contains_key(&duel("0xd1")));
    }
    assert_eq!(referee.status().pending_retries, 1);

    let report = referee.resolve_expired().await;
    assert_eq!(report.settled, 1);
    assert!(referee.book().is_empty());
    assert_eq!(ledger.submissions().len(), 3);
    assert_eq!(referee.status().pending_retries, 0);
}

#[tokio::test]
async fn test_rejected_settlement_is_not_retried() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);
    let mut referee = referee(&ledger, &store, &clock);
    referee.start().await.unwrap();

    ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
    referee.ingest().await;
    ledger.script_settlements(vec![Err(LedgerError::rejected("MoveAbort code 3"))]);
    ledger.set_status(&duel("0xd1"), OnChainStatus::Resolved);
    clock.set_ms(i64::try_from(T0 + WINDOW).unwrap());

    let report = referee.resolve_expired().await;
    assert_eq!(report.already_settled, 1);
    assert!(referee.book().is_empty());
    assert!(store.snapshot().duels.is_empty());

    clock.advance(Duration::from_secs(60));
    referee.resolve_expired().await;
    assert_eq!(ledger.submissions().len(), 1);
}

#[tokio::test]
async fn test_rejected_settlement_of_live_duel_is_retried() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);
    let mut referee = referee(&ledger, &store, &clock);
    referee.start().await.unwrap();

    ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
    referee.ingest().await;
    // On-chain clock still behind the window end.
    ledger.script_settlements(vec![Err(LedgerError::rejected(
        "MoveAbort in duel::resolve: duel not expired",
    ))]);
    ledger.set_status(&duel("0xd1"), OnChainStatus::Active);
    clock.set_ms(i64::try_from(T0 + WINDOW).unwrap());

    let report = referee.resolve_expired().await;
    assert_eq!(report.retry_pending, 1);
    assert_eq!(report.already_settled, 0);
    assert!(referee.book().contains(&duel("0xd1")));
    assert!(store.snapshot().duels.contains_key(&duel("0xd1")));
    assert_eq!(referee.status().pending_retries, 1);

    clock.advance(Duration::from_secs(10));
    let report = referee.resolve_expired().await;
    assert_eq!(report.settled, 1);
    assert!(referee.book().is_empty());
    assert_eq!(ledger.submissions().len(), 2);
    assert_eq!(ledger.confirmed(), 1);
}

#[tokio::test]
async fn test_end_balance_failure_keeps_duel_due() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);
    let mut referee = referee(&ledger, &store, &clock);
    referee.start().await.unwrap();

    ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
    referee.ingest().await;
    clock.set_ms(i64::try_from(T0 + WINDOW).unwrap());

    ledger.fail_balances(true);
    let report = referee.resolve_expired().await;
    assert_eq!(report.retry_pending, 1);
    assert!(ledger.submissions().is_empty());

    ledger.fail_balances(false);
    let report = referee.resolve_expired().await;
    assert_eq!(report.settled, 1);
}

#[tokio::test]
async fn test_due_duels_settle_oldest_first() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);
    let mut referee = referee(&ledger, &store, &clock);
    referee.start().await.unwrap();

    ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, 600_000));
    ledger.push_event(join_event("JoinB", "0xd2", "0xc1", "0x0b", T0, 180_000));
    referee.ingest().await;

    clock.set_ms(600_000);
    referee.resolve_expired().await;

    let order: Vec<_> = ledger.submissions().into_iter().map(|r| r.duel_id).collect();
    assert_eq!(order, vec![duel("0xd2"), duel("0xd1")]);
}

#[tokio::test(start_paused = true)]
async fn test_settlement_timeout_keeps_duel_due() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);
    let mut referee = Referee::new(
        TimeoutGateway::new(ledger.clone(), Duration::from_secs(30)),
        store.clone(),
        clock.clone(),
        RefereeSettings::default(),
    );
    referee.start().await.unwrap();

    ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
    referee.ingest().await;

    ledger.delay_settlements(Duration::from_secs(120));
    clock.set_ms(i64::try_from(T0 + WINDOW).unwrap());
    let report = referee.resolve_expired().await;

    assert_eq!(report.retry_pending, 1);
    assert!(referee.book().contains(&duel("0xd1")));
}

// =============================================================================
// Restart & recovery
// =============================================================================

#[tokio::test]
async fn test_settlement_at_most_once_across_restart() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);

    {
        let mut first = referee(&ledger, &store, &clock);
        first.start().await.unwrap();
        ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
        first.ingest().await;
        clock.set_ms(i64::try_from(T0 + WINDOW).unwrap());
        first.resolve_expired().await;
        // Crash: no shutdown, no final save.
    }

    let mut second = referee(&ledger, &store, &clock);
    let recovery = second.start().await.unwrap();
    assert_eq!(recovery.recovered, 0);
    second.ingest().await;
    second.resolve_expired().await;

    assert_eq!(ledger.submissions().len(), 1);
    assert_eq!(ledger.confirmed(), 1);
    assert!(second.book().is_empty());
}

#[tokio::test]
async fn test_crash_before_removal_is_saved_settles_once() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);

    {
        let mut first = referee(&ledger, &store, &clock);
        first.start().await.unwrap();
        ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
        first.ingest().await;

        // The settlement lands but its removal never reaches the store.
        store.set_fail_saves(true);
        clock.set_ms(i64::try_from(T0 + WINDOW).unwrap());
        first.resolve_expired().await;
    }
    store.set_fail_saves(false);

    let mut second = referee(&ledger, &store, &clock);
    second.start().await.unwrap();
    assert!(second.book().contains(&duel("0xd1")));

    let report = second.resolve_expired().await;
    assert_eq!(report.already_settled, 1);
    assert!(second.book().is_empty());
    assert!(store.snapshot().duels.is_empty());
    assert_eq!(ledger.confirmed(), 1);
}

#[tokio::test]
async fn test_restart_resumes_tracked_duel_with_original_balances() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);

    {
        let mut first = referee(&ledger, &store, &clock);
        first.start().await.unwrap();
        ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
        first.ingest().await;
    }

    ledger.set_status(&duel("0xd1"), OnChainStatus::Active);
    ledger.set_balance(&account("0xc1"), 1500);
    ledger.set_balance(&account("0x0b"), 700);

    let mut second = referee(&ledger, &store, &clock);
    second.start().await.unwrap();
    let record = second.book().get(&duel("0xd1")).unwrap();
    assert_eq!(record.creator_start_balance(), Balance::new(1000));
    assert_eq!(record.origin(), RecordOrigin::JoinEvent);

    clock.set_ms(i64::try_from(T0 + WINDOW).unwrap());
    second.resolve_expired().await;
    let request = &ledger.submissions()[0];
    assert_eq!(request.creator_start, Balance::new(1000));
    assert_eq!(request.creator_end, Balance::new(1500));
}

#[tokio::test]
async fn test_recovery_adds_only_active_duels() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0 + 60_000);

    ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
    ledger.push_event(join_event("JoinB", "0xd2", "0xc1", "0x0b", T0, WINDOW));
    ledger.set_status(&duel("0xd1"), OnChainStatus::Active);
    ledger.set_status(&duel("0xd2"), OnChainStatus::Resolved);

    let mut referee = referee(&ledger, &store, &clock);
    let report = referee.start().await.unwrap();

    assert_eq!(report.recovered, 1);
    assert_eq!(report.skipped_settled, 1);
    let saved = store.snapshot();
    assert_eq!(saved.duels.len(), 1);
    let record = &saved.duels[&duel("0xd1")];
    assert_eq!(record.origin(), RecordOrigin::Recovery);

    // The resolved duel's event is consumed and never resurrected.
    referee.ingest().await;
    assert!(!referee.book().contains(&duel("0xd2")));
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_persistence_failure_keeps_state_and_retries() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);
    let mut referee = referee(&ledger, &store, &clock);
    referee.start().await.unwrap();

    store.set_fail_saves(true);
    ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
    referee.ingest().await;

    assert_eq!(referee.book().len(), 1);
    let status = referee.status();
    assert!(!status.persistence_healthy);
    assert!(status.unsaved_changes);
    assert!(store.snapshot().is_empty());

    store.set_fail_saves(false);
    assert!(referee.persist().await);
    assert_eq!(store.snapshot().duels.len(), 1);
    assert!(referee.status().persistence_healthy);
}

// =============================================================================
// Actor
// =============================================================================

#[tokio::test]
async fn test_actor_processes_ticks_and_saves_on_shutdown() {
    let ledger = funded_ledger();
    let store = MemoryStore::new();
    let clock = clock_at(T0);
    let mut referee = referee(&ledger, &store, &clock);
    referee.start().await.unwrap();

    let (handle, commands) = channel(8);
    let actor = tokio::spawn(referee.run(commands));

    ledger.push_event(join_event("JoinA", "0xd1", "0xc1", "0x0b", T0, WINDOW));
    handle.tick(Tick::Ingest).await.unwrap();
    let status = handle.status().await.unwrap();
    assert_eq!(status.tracked, 1);
    assert_eq!(status.due, 0);
    assert_eq!(status.duels[0].duel_id, "0xd1");

    clock.set_ms(i64::try_from(T0 + WINDOW).unwrap());
    assert_eq!(handle.status().await.unwrap().due, 1);
    handle.tick(Tick::ExpiryScan).await.unwrap();
    handle.shutdown().await.unwrap();

    let final_status = actor.await.unwrap();
    assert_eq!(final_status.tracked, 0);
    assert!(!final_status.unsaved_changes);
    assert_eq!(ledger.submissions().len(), 1);
    assert!(store.snapshot().duels.is_empty());
}
