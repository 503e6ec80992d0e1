//! Expiry resolution.
//!
//! A tracked duel moves `Tracked -> Due -> Settling` and ends either
//! `Settled` (record dropped) or `RetryPending`, which the next scan treats
//! exactly like `Due`.

use duel_referee_core::{Balance, DuelRecord, LedgerGateway, SettlementRequest, TxDigest};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use crate::gateway::fetch_balances;
use crate::settlement::{SettlementOutcome, SettlementSubmitter};

/// Lifecycle phase of a tracked duel as seen by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelPhase {
    Tracked,
    Due,
    Settling,
    Settled,
    RetryPending,
}

impl DuelPhase {
    /// Phase of a record between scans.
    #[must_use]
    pub fn of(record: &DuelRecord, now_ms: u64, failed_attempts: u32) -> Self {
        if !record.is_due(now_ms) {
            Self::Tracked
        } else if failed_attempts > 0 {
            Self::RetryPending
        } else {
            Self::Due
        }
    }
}

impl fmt::Display for DuelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Tracked => "tracked",
            Self::Due => "due",
            Self::Settling => "settling",
            Self::Settled => "settled",
            Self::RetryPending => "retry-pending",
        };
        f.write_str(s)
    }
}

/// Percentage change as basis points of the start balance.
///
/// `end * 10000 / start`, so 10000 means unchanged. A zero start scores 0.
#[must_use]
pub fn score_bps(start: Balance, end: Balance) -> u128 {
    if start.get() == 0 {
        return 0;
    }
    u128::from(end.get()) * 10_000 / u128::from(start.get())
}

/// Side ahead on raw end balance. Informational only; the contract decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leader {
    Creator,
    Opponent,
    Tie,
}

impl Leader {
    #[must_use]
    pub fn by_end_balance(creator_end: Balance, opponent_end: Balance) -> Self {
        match creator_end.cmp(&opponent_end) {
            std::cmp::Ordering::Greater => Self::Creator,
            std::cmp::Ordering::Less => Self::Opponent,
            std::cmp::Ordering::Equal => Self::Tie,
        }
    }
}

impl fmt::Display for Leader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creator => "creator",
            Self::Opponent => "opponent",
            Self::Tie => "tie",
        };
        f.write_str(s)
    }
}

/// What happened to one due duel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Settled(TxDigest),
    AlreadySettled { reason: String },
    RetryPending { reason: String },
}

impl Resolution {
    #[must_use]
    pub const fn phase(&self) -> DuelPhase {
        match self {
            Self::Settled(_) | Self::AlreadySettled { .. } => DuelPhase::Settled,
            Self::RetryPending { .. } => DuelPhase::RetryPending,
        }
    }

    /// Returns true if the record should be dropped.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.phase(), DuelPhase::Settled)
    }
}

/// Counters for one expiry scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionReport {
    pub due: usize,
    pub settled: usize,
    pub already_settled: usize,
    pub retry_pending: usize,
}

impl ResolutionReport {
    pub fn record(&mut self, resolution: &Resolution) {
        match resolution {
            Resolution::Settled(_) => self.settled += 1,
            Resolution::AlreadySettled { .. } => self.already_settled += 1,
            Resolution::RetryPending { .. } => self.retry_pending += 1,
        }
    }
}

/// Measures end balances for a due duel and submits its settlement.
pub async fn resolve_due<G: LedgerGateway + ?Sized>(
    record: &DuelRecord,
    gateway: &G,
    submitter: &mut SettlementSubmitter,
) -> Resolution {
    let (creator_end, opponent_end) =
        match fetch_balances(gateway, record.creator(), record.opponent()).await {
            Ok(balances) => balances,
            Err(e) => {
                warn!(
                    duel_id = %record.duel_id(),
                    error = %e,
                    "End balance fetch failed, will retry on next scan"
                );
                return Resolution::RetryPending {
                    reason: e.to_string(),
                };
            }
        };

    let request = SettlementRequest::for_record(record, creator_end, opponent_end);
    let leader = Leader::by_end_balance(creator_end, opponent_end);

    debug!(duel_id = %record.duel_id(), phase = %DuelPhase::Settling, "Submitting settlement");
    info!(
        duel_id = %record.duel_id(),
        creator_start = %request.creator_start,
        creator_end = %request.creator_end,
        opponent_start = %request.opponent_start,
        opponent_end = %request.opponent_end,
        creator_score_bps = %score_bps(request.creator_start, request.creator_end),
        opponent_score_bps = %score_bps(request.opponent_start, request.opponent_end),
        provisional_leader = %leader,
        "Duel window closed"
    );

    match submitter.submit(gateway, &request).await {
        SettlementOutcome::Confirmed(digest) => Resolution::Settled(digest),
        SettlementOutcome::AlreadySettled { reason } => Resolution::AlreadySettled { reason },
        SettlementOutcome::RetryPending { error, .. } => Resolution::RetryPending {
            reason: error.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use duel_referee_core::{AccountId, DuelId, EventId, JoinEvent, RecordOrigin};

    fn record() -> DuelRecord {
        let event = JoinEvent {
            event_id: EventId::new("DigestA", 0).unwrap(),
            duel_id: DuelId::parse("0xd1").unwrap(),
            creator: AccountId::parse("0xa1").unwrap(),
            opponent: AccountId::parse("0xb1").unwrap(),
            start_time_ms: 0,
            duration_ms: 300_000,
        };
        DuelRecord::from_join(
            &event,
            Balance::new(1000),
            Balance::new(1000),
            RecordOrigin::JoinEvent,
            Utc::now(),
        )
    }

    // ==================== Score Tests ====================

    #[test]
    fn test_score_bps() {
        assert_eq!(score_bps(Balance::new(1000), Balance::new(1200)), 12_000);
        assert_eq!(score_bps(Balance::new(1000), Balance::new(900)), 9_000);
        assert_eq!(score_bps(Balance::new(3), Balance::new(1)), 3_333);
    }

    #[test]
    fn test_score_zero_start_is_zero() {
        assert_eq!(score_bps(Balance::ZERO, Balance::new(500)), 0);
    }

    #[test]
    fn test_score_does_not_overflow() {
        assert_eq!(
            score_bps(Balance::new(1), Balance::new(u64::MAX)),
            u128::from(u64::MAX) * 10_000
        );
    }

    #[test]
    fn test_leader_by_end_balance() {
        assert_eq!(
            Leader::by_end_balance(Balance::new(1200), Balance::new(900)),
            Leader::Creator
        );
        assert_eq!(
            Leader::by_end_balance(Balance::new(1), Balance::new(2)),
            Leader::Opponent
        );
        assert_eq!(Leader::by_end_balance(Balance::new(5), Balance::new(5)), Leader::Tie);
    }

    // ==================== Phase Tests ====================

    #[test]
    fn test_phase_of_record() {
        let record = record();
        assert_eq!(DuelPhase::of(&record, 299_999, 0), DuelPhase::Tracked);
        assert_eq!(DuelPhase::of(&record, 300_000, 0), DuelPhase::Due);
        assert_eq!(DuelPhase::of(&record, 300_000, 2), DuelPhase::RetryPending);
    }

    #[test]
    fn test_report_counts_resolutions() {
        let mut report = ResolutionReport::default();
        report.record(&Resolution::Settled(TxDigest("D".to_string())));
        report.record(&Resolution::AlreadySettled {
            reason: "MoveAbort".to_string(),
        });
        report.record(&Resolution::RetryPending {
            reason: "503".to_string(),
        });

        assert_eq!(report.settled, 1);
        assert_eq!(report.already_settled, 1);
        assert_eq!(report.retry_pending, 1);
        assert!(Resolution::AlreadySettled {
            reason: String::new()
        }
        .is_terminal());
    }
}
