//! Gateway decorators used by the engine.

use async_trait::async_trait;
use duel_referee_core::{
    AccountId, Balance, DuelId, JoinEvent, LedgerError, LedgerGateway, LedgerResult,
    OnChainStatus, SettlementRequest, TxDigest,
};
use std::future::Future;
use std::time::Duration;

/// Bounds every call of the wrapped gateway by a fixed timeout.
///
/// An elapsed read becomes [`LedgerError::TransientFetch`]; an elapsed
/// settlement becomes [`LedgerError::Submission`], so the duel stays due and
/// the next scan asks the ledger again.
#[derive(Debug, Clone)]
pub struct TimeoutGateway<G> {
    inner: G,
    timeout: Duration,
}

impl<G> TimeoutGateway<G> {
    pub const fn new(inner: G, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub const fn inner(&self) -> &G {
        &self.inner
    }

    async fn bounded<T>(
        &self,
        what: &str,
        on_elapsed: fn(String) -> LedgerError,
        call: impl Future<Output = LedgerResult<T>> + Send,
    ) -> LedgerResult<T> {
        tokio::time::timeout(self.timeout, call).await.unwrap_or_else(|_| {
            Err(on_elapsed(format!(
                "{what} timed out after {} ms",
                self.timeout.as_millis()
            )))
        })
    }
}

#[async_trait]
impl<G: LedgerGateway> LedgerGateway for TimeoutGateway<G> {
    async fn query_join_events(&self, limit: usize) -> LedgerResult<Vec<JoinEvent>> {
        self.bounded(
            "join event query",
            LedgerError::TransientFetch,
            self.inner.query_join_events(limit),
        )
        .await
    }

    async fn get_balance(&self, account: &AccountId) -> LedgerResult<Balance> {
        self.bounded(
            "balance fetch",
            LedgerError::TransientFetch,
            self.inner.get_balance(account),
        )
        .await
    }

    async fn get_duel_status(&self, duel_id: &DuelId) -> LedgerResult<OnChainStatus> {
        self.bounded(
            "duel status fetch",
            LedgerError::TransientFetch,
            self.inner.get_duel_status(duel_id),
        )
        .await
    }

    async fn submit_settlement(&self, request: &SettlementRequest) -> LedgerResult<TxDigest> {
        self.bounded(
            "settlement",
            LedgerError::Submission,
            self.inner.submit_settlement(request),
        )
        .await
    }
}

/// Fetches both participants' balances concurrently.
///
/// # Errors
/// Returns the first failure; the other fetch is dropped.
pub async fn fetch_balances<G: LedgerGateway + ?Sized>(
    gateway: &G,
    creator: &AccountId,
    opponent: &AccountId,
) -> LedgerResult<(Balance, Balance)> {
    tokio::try_join!(gateway.get_balance(creator), gateway.get_balance(opponent))
}
