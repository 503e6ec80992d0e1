//! Duel referee engine.
//!
//! Watches joined duels on the ledger, snapshots both participants' balances
//! at join, and settles each duel once its window closes. The engine is
//! ledger- and store-agnostic: it speaks only through the
//! [`LedgerGateway`](duel_referee_core::LedgerGateway) and
//! [`DuelStore`](duel_referee_core::DuelStore) traits.

pub mod book;
pub mod commands;
pub mod gateway;
pub mod handle;
pub mod ingestion;
pub mod recovery;
pub mod referee;
pub mod resolver;
pub mod scheduler;
pub mod service;
pub mod settlement;
pub mod status;

pub use book::DuelBook;
pub use commands::{RefereeCommand, Tick};
pub use gateway::{fetch_balances, TimeoutGateway};
pub use handle::{channel, CommandReceiver, RefereeHandle, TickResult};
pub use ingestion::{ingest_events, IngestReport};
pub use recovery::{reconcile, RecoveryReport};
pub use referee::{Referee, RefereeError, RefereeSettings};
pub use resolver::{resolve_due, score_bps, DuelPhase, Leader, Resolution, ResolutionReport};
pub use scheduler::spawn_tickers;
pub use service::{acquire_lease, release_lease, run_service};
pub use settlement::{SettlementOutcome, SettlementSubmitter};
pub use status::{DuelSummary, RefereeStatus};
