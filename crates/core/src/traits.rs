use crate::error::{LedgerResult, PersistenceError};
use crate::types::{
    AccountId, Balance, DuelId, JoinEvent, OnChainStatus, SettlementRequest, StoreSnapshot,
    TxDigest,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Read and write access to the ledger that owns the duel contract.
///
/// Implementations must be safe to call repeatedly; the referee tolerates
/// at-least-once delivery and replays on its side.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Returns the most recent `limit` join events, newest first.
    async fn query_join_events(&self, limit: usize) -> LedgerResult<Vec<JoinEvent>>;

    /// Returns the measurable balance of `account` right now.
    async fn get_balance(&self, account: &AccountId) -> LedgerResult<Balance>;

    /// Returns the duel object's lifecycle status.
    async fn get_duel_status(&self, duel_id: &DuelId) -> LedgerResult<OnChainStatus>;

    /// Submits the single settlement transaction for a duel.
    async fn submit_settlement(&self, request: &SettlementRequest) -> LedgerResult<TxDigest>;
}

/// Durable backing for tracked duels and consumed event ids.
#[async_trait]
pub trait DuelStore: Send + Sync {
    /// Reads the last saved snapshot, or an empty one on first run.
    async fn load(&self) -> Result<StoreSnapshot, PersistenceError>;

    /// Atomically replaces the saved snapshot.
    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError>;

    /// Human-readable location for log lines.
    fn describe(&self) -> String;
}

/// Source of the current instant, injectable so tests control expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current instant in milliseconds since the Unix epoch (0 before it).
    fn now_ms(&self) -> u64 {
        u64::try_from(self.now().timestamp_millis()).unwrap_or(0)
    }
}

#[async_trait]
impl<T: LedgerGateway + ?Sized> LedgerGateway for Arc<T> {
    async fn query_join_events(&self, limit: usize) -> LedgerResult<Vec<JoinEvent>> {
        (**self).query_join_events(limit).await
    }

    async fn get_balance(&self, account: &AccountId) -> LedgerResult<Balance> {
        (**self).get_balance(account).await
    }

    async fn get_duel_status(&self, duel_id: &DuelId) -> LedgerResult<OnChainStatus> {
        (**self).get_duel_status(duel_id).await
    }

    async fn submit_settlement(&self, request: &SettlementRequest) -> LedgerResult<TxDigest> {
        (**self).submit_settlement(request).await
    }
}

#[async_trait]
impl<T: DuelStore + ?Sized> DuelStore for Arc<T> {
    async fn load(&self) -> Result<StoreSnapshot, PersistenceError> {
        (**self).load().await
    }

    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        (**self).save(snapshot).await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}
