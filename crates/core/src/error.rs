//! Error taxonomy shared by every referee component.
//!
//! Ledger failures are split by how the caller must react to them:
//! transient reads are retried on the next poll, submission failures leave
//! the duel due for the next expiry scan, and rejections are terminal.

use thiserror::Error;

/// Errors returned by a [`LedgerGateway`](crate::traits::LedgerGateway).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Network or RPC failure while reading events, balances, or objects.
    #[error("transient fetch error: {0}")]
    TransientFetch(String),

    /// Settlement transaction could not be built, signed, sent, or confirmed.
    #[error("settlement submission failed: {0}")]
    Submission(String),

    /// The contract refused the settlement (e.g. duel already resolved).
    #[error("settlement rejected by contract: {0}")]
    SettlementRejected(String),
}

impl LedgerError {
    /// Creates a transient fetch error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientFetch(message.into())
    }

    /// Creates a submission error.
    pub fn submission(message: impl Into<String>) -> Self {
        Self::Submission(message.into())
    }

    /// Creates a settlement rejection.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::SettlementRejected(message.into())
    }

    /// Returns true if the contract reported the duel as not resolvable.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::SettlementRejected(_))
    }
}

/// Errors from the durable duel state store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// IO error reading/writing the backing file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Snapshot was written by an incompatible format version.
    #[error("unsupported snapshot version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found in the persisted snapshot.
        found: u32,
        /// Version this build reads and writes.
        supported: u32,
    },

    /// Database backend failure.
    #[error("database error: {0}")]
    Database(String),

    /// The store was configured to refuse writes (tests, read-only mounts).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl PersistenceError {
    /// Creates an encoding error from any displayable cause.
    pub fn encoding(cause: impl std::fmt::Display) -> Self {
        Self::Encoding(cause.to_string())
    }

    /// Creates a database error from any displayable cause.
    pub fn database(cause: impl std::fmt::Display) -> Self {
        Self::Database(cause.to_string())
    }
}

/// A mutation that would break a per-duel invariant.
///
/// Never expected in a correct build; raising one aborts processing of the
/// affected duel and leaves the stored record untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateInvariantViolation {
    /// Attempt to replace the captured start snapshot of a tracked duel.
    #[error(
        "start balances of duel {duel_id} are immutable: stored {stored_creator}/{stored_opponent}, attempted {attempted_creator}/{attempted_opponent}"
    )]
    StartBalanceOverwrite {
        /// Duel whose record was targeted.
        duel_id: String,
        /// Creator start balance already stored.
        stored_creator: u64,
        /// Opponent start balance already stored.
        stored_opponent: u64,
        /// Creator start balance in the rejected write.
        attempted_creator: u64,
        /// Opponent start balance in the rejected write.
        attempted_opponent: u64,
    },

    /// Attempt to rebind the participants of a tracked duel.
    #[error("participants of duel {duel_id} are immutable")]
    ParticipantRebind {
        /// Duel whose record was targeted.
        duel_id: String,
    },

    /// Snapshot contains a record stored under another duel's key.
    #[error("record for duel {record} is filed under key {key}")]
    KeyMismatch {
        /// Key the record was found under.
        key: String,
        /// Duel id carried by the record itself.
        record: String,
    },
}

/// Rejected identifier or event field.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Identifier is not 0x-prefixed hex of a valid length.
    #[error("invalid {kind} identifier: {value:?}")]
    InvalidId {
        /// What the identifier names (duel, account, ...).
        kind: &'static str,
        /// Offending input.
        value: String,
    },

    /// Event id is not `<digest>:<sequence>`.
    #[error("invalid event id: {0:?}")]
    InvalidEventId(String),

    /// Amount is not an unsigned 64-bit integer.
    #[error("invalid amount: {0:?}")]
    InvalidAmount(String),
}

/// Result type alias for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
