//! Scripted in-memory ledger shared by the scenario tests.

#![allow(dead_code)]

use async_trait::async_trait;
use duel_referee_core::{
    AccountId, Balance, DuelId, EventId, JoinEvent, LedgerError, LedgerGateway, LedgerResult,
    ManualClock, OnChainStatus, SettlementRequest, TxDigest,
};
use duel_referee_engine::{Referee, RefereeSettings};
use duel_referee_store::MemoryStore;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct LedgerState {
    /// Oldest first; returned newest first.
    events: Vec<JoinEvent>,
    balances: HashMap<AccountId, Balance>,
    statuses: HashMap<DuelId, OnChainStatus>,
    settlement_script: VecDeque<LedgerResult<TxDigest>>,
    submissions: Vec<SettlementRequest>,
    balance_calls: usize,
    status_calls: usize,
    fail_event_queries: bool,
    fail_balances: bool,
    settle_delay: Option<Duration>,
    next_digest: u64,
    confirmed: usize,
}

/// Ledger double whose events, balances, statuses, and settlement results
/// are set by the test. Clones share state, so a test keeps one handle and
/// gives another to the referee.
#[derive(Clone, Default)]
pub struct ScriptedLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl ScriptedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_event(&self, event: JoinEvent) {
        self.state.lock().events.push(event);
    }

    pub fn set_balance(&self, account: &AccountId, amount: u64) {
        self.state
            .lock()
            .balances
            .insert(account.clone(), Balance::new(amount));
    }

    pub fn set_status(&self, duel_id: &DuelId, status: OnChainStatus) {
        self.state.lock().statuses.insert(duel_id.clone(), status);
    }

    /// Queues the results of upcoming settlement calls. Once the script is
    /// empty, settlements succeed with generated digests, and a duel that
    /// already settled is rejected the way the contract aborts.
    pub fn script_settlements(&self, results: Vec<LedgerResult<TxDigest>>) {
        self.state.lock().settlement_script.extend(results);
    }

    pub fn fail_event_queries(&self, fail: bool) {
        self.state.lock().fail_event_queries = fail;
    }

    pub fn fail_balances(&self, fail: bool) {
        self.state.lock().fail_balances = fail;
    }

    pub fn delay_settlements(&self, delay: Duration) {
        self.state.lock().settle_delay = Some(delay);
    }

    pub fn submissions(&self) -> Vec<SettlementRequest> {
        self.state.lock().submissions.clone()
    }

    pub fn balance_calls(&self) -> usize {
        self.state.lock().balance_calls
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().status_calls
    }

    /// Settlements that actually executed.
    pub fn confirmed(&self) -> usize {
        self.state.lock().confirmed
    }
}

#[async_trait]
impl LedgerGateway for ScriptedLedger {
    async fn query_join_events(&self, limit: usize) -> LedgerResult<Vec<JoinEvent>> {
        let state = self.state.lock();
        if state.fail_event_queries {
            return Err(LedgerError::transient("event query unavailable"));
        }
        Ok(state.events.iter().rev().take(limit).cloned().collect())
    }

    async fn get_balance(&self, account: &AccountId) -> LedgerResult<Balance> {
        let mut state = self.state.lock();
        state.balance_calls += 1;
        if state.fail_balances {
            return Err(LedgerError::transient("balance query unavailable"));
        }
        Ok(state.balances.get(account).copied().unwrap_or_default())
    }

    async fn get_duel_status(&self, duel_id: &DuelId) -> LedgerResult<OnChainStatus> {
        let mut state = self.state.lock();
        state.status_calls += 1;
        Ok(state
            .statuses
            .get(duel_id)
            .copied()
            .unwrap_or(OnChainStatus::NotFound))
    }

    async fn submit_settlement(&self, request: &SettlementRequest) -> LedgerResult<TxDigest> {
        let delay = self.state.lock().settle_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.submissions.push(request.clone());
        if let Some(result) = state.settlement_script.pop_front() {
            if result.is_ok() {
                state.confirmed += 1;
            }
            return result;
        }

        match state.statuses.get(&request.duel_id) {
            Some(OnChainStatus::Resolved | OnChainStatus::Cancelled) => Err(LedgerError::rejected(
                "MoveAbort in duel::resolve: duel not active",
            )),
            _ => {
                state.next_digest += 1;
                state.confirmed += 1;
                state
                    .statuses
                    .insert(request.duel_id.clone(), OnChainStatus::Resolved);
                Ok(TxDigest(format!("Settle{}", state.next_digest)))
            }
        }
    }
}

pub fn account(raw: &str) -> AccountId {
    AccountId::parse(raw).unwrap()
}

pub fn duel(raw: &str) -> DuelId {
    DuelId::parse(raw).unwrap()
}

pub fn join_event(
    digest: &str,
    duel_id: &str,
    creator: &str,
    opponent: &str,
    start_time_ms: u64,
    duration_ms: u64,
) -> JoinEvent {
    JoinEvent {
        event_id: EventId::new(digest, 0).unwrap(),
        duel_id: duel(duel_id),
        creator: account(creator),
        opponent: account(opponent),
        start_time_ms,
        duration_ms,
    }
}

pub type TestReferee = Referee<ScriptedLedger, MemoryStore, ManualClock>;

/// Builds a referee over shared ledger, store, and clock handles.
///
/// Building a second referee from the same store simulates a process
/// restart after a crash.
pub fn referee(ledger: &ScriptedLedger, store: &MemoryStore, clock: &ManualClock) -> TestReferee {
    Referee::new(
        ledger.clone(),
        store.clone(),
        clock.clone(),
        RefereeSettings {
            event_page_size: 50,
            recovery_page_size: 200,
        },
    )
}
