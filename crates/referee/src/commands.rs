//! Commands accepted by the referee actor.

use serde::Serialize;
use tokio::sync::oneshot;

use crate::status::RefereeStatus;

/// Periodic work item sent by a ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tick {
    /// Poll the ledger for new join events.
    Ingest,
    /// Settle every duel whose window has closed.
    ExpiryScan,
    /// Save the snapshot if anything changed since the last save.
    Persist,
}

#[derive(Debug)]
pub enum RefereeCommand {
    Tick(Tick),
    GetStatus(oneshot::Sender<RefereeStatus>),
    /// Finish the current command, save, and exit.
    Shutdown,
}
