//! Settlement submission.
//!
//! One call per invocation; the expiry scan owns retries. A contract
//! rejection only ends tracking once the ledger confirms the duel can no
//! longer be settled.

use duel_referee_core::{
    DuelId, LedgerError, LedgerGateway, OnChainStatus, SettlementRequest, TxDigest,
};
use std::collections::HashMap;
use tracing::{info, warn};

/// Result of one settlement attempt, from the bookkeeping point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Transaction executed; the duel is settled.
    Confirmed(TxDigest),
    /// Contract refused the call and the duel is resolved, cancelled, or
    /// gone on chain.
    AlreadySettled { reason: String },
    /// Submission failed, or was rejected while the duel is still live; the
    /// duel stays due for the next scan.
    RetryPending { attempt: u32, error: LedgerError },
}

/// Sends exactly one settlement call per invocation and keeps per-duel
/// attempt counts for the logs. Retrying is the expiry scan's job.
#[derive(Debug, Default)]
pub struct SettlementSubmitter {
    attempts: HashMap<DuelId, u32>,
}

impl SettlementSubmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn submit<G: LedgerGateway + ?Sized>(
        &mut self,
        gateway: &G,
        request: &SettlementRequest,
    ) -> SettlementOutcome {
        let attempt = {
            let counter = self.attempts.entry(request.duel_id.clone()).or_insert(0);
            *counter += 1;
            *counter
        };

        match gateway.submit_settlement(request).await {
            Ok(digest) => {
                self.attempts.remove(&request.duel_id);
                info!(
                    duel_id = %request.duel_id,
                    attempt,
                    tx_digest = %digest,
                    "Duel settled"
                );
                SettlementOutcome::Confirmed(digest)
            }
            Err(error) if error.is_rejection() => {
                self.confirm_rejection(gateway, request, attempt, error)
                    .await
            }
            Err(error) => {
                warn!(
                    duel_id = %request.duel_id,
                    attempt,
                    error = %error,
                    "Settlement failed, will retry on next scan"
                );
                SettlementOutcome::RetryPending { attempt, error }
            }
        }
    }

    /// Asks the ledger whether a rejected duel is really finished.
    ///
    /// Only `Resolved`, `Cancelled`, or a missing object end the duel; any
    /// other answer leaves it due.
    async fn confirm_rejection<G: LedgerGateway + ?Sized>(
        &mut self,
        gateway: &G,
        request: &SettlementRequest,
        attempt: u32,
        error: LedgerError,
    ) -> SettlementOutcome {
        match gateway.get_duel_status(&request.duel_id).await {
            Ok(status) if status.is_final() || status == OnChainStatus::NotFound => {
                self.attempts.remove(&request.duel_id);
                info!(
                    duel_id = %request.duel_id,
                    attempt,
                    on_chain = %status,
                    reason = %error,
                    "Settlement rejected by contract, duel already closed"
                );
                SettlementOutcome::AlreadySettled {
                    reason: error.to_string(),
                }
            }
            Ok(status) => {
                warn!(
                    duel_id = %request.duel_id,
                    attempt,
                    on_chain = %status,
                    error = %error,
                    "Settlement rejected but duel is still live, will retry on next scan"
                );
                SettlementOutcome::RetryPending { attempt, error }
            }
            Err(status_error) => {
                warn!(
                    duel_id = %request.duel_id,
                    attempt,
                    error = %error,
                    status_error = %status_error,
                    "Settlement rejected and duel status unknown, will retry on next scan"
                );
                SettlementOutcome::RetryPending { attempt, error }
            }
        }
    }

    /// Attempts made so far for a duel that has not settled yet.
    #[must_use]
    pub fn attempts(&self, duel_id: &DuelId) -> u32 {
        self.attempts.get(duel_id).copied().unwrap_or(0)
    }

    /// Number of duels with at least one failed attempt.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.attempts.len()
    }

    pub fn forget(&mut self, duel_id: &DuelId) {
        self.attempts.remove(duel_id);
    }
}
