//! Data model for tracked duels.
//!
//! Identifiers are validated on construction and on deserialization, so a
//! `DuelRecord` loaded from disk or decoded from the ledger always carries
//! well-formed ids.

use crate::error::ParseError;
use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Identifiers
// =============================================================================

/// Maximum hex digits in a ledger address or object id (32 bytes).
const MAX_HEX_DIGITS: usize = 64;

fn normalize_hex_id(kind: &'static str, raw: &str) -> Result<String, ParseError> {
    let invalid = || ParseError::InvalidId {
        kind,
        value: raw.to_string(),
    };

    let digits = raw.strip_prefix("0x").ok_or_else(invalid)?;
    if digits.is_empty() || digits.len() > MAX_HEX_DIGITS {
        return Err(invalid());
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    Ok(format!("0x{}", digits.to_ascii_lowercase()))
}

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parses and lowercases a 0x-prefixed hex identifier.
            ///
            /// # Errors
            /// Returns [`ParseError::InvalidId`] for anything else.
            pub fn parse(raw: &str) -> Result<Self, ParseError> {
                normalize_hex_id($kind, raw).map(Self)
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Shortened form for log lines.
            #[must_use]
            pub fn short(&self) -> &str {
                let end = self.0.len().min(12);
                &self.0[..end]
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

hex_id!(
    /// Ledger object id of a duel.
    DuelId,
    "duel"
);

hex_id!(
    /// Ledger account address of a participant.
    AccountId,
    "account"
);

/// Identifier of a consumed ledger event: transaction digest plus the
/// event's sequence number within that transaction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId {
    tx_digest: String,
    event_seq: u64,
}

impl EventId {
    /// Creates an event id.
    ///
    /// # Errors
    /// Returns [`ParseError::InvalidEventId`] if the digest is empty or
    /// contains characters outside the base58/base64 alphabet.
    pub fn new(tx_digest: impl Into<String>, event_seq: u64) -> Result<Self, ParseError> {
        let tx_digest = tx_digest.into();
        let valid = !tx_digest.is_empty()
            && tx_digest.len() <= 128
            && tx_digest
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '_' | '-'));
        if !valid {
            return Err(ParseError::InvalidEventId(tx_digest));
        }
        Ok(Self {
            tx_digest,
            event_seq,
        })
    }

    /// Transaction digest that emitted the event.
    #[must_use]
    pub fn tx_digest(&self) -> &str {
        &self.tx_digest
    }

    /// Sequence number of the event within its transaction.
    #[must_use]
    pub const fn event_seq(&self) -> u64 {
        self.event_seq
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_digest, self.event_seq)
    }
}

impl FromStr for EventId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (digest, seq) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseError::InvalidEventId(s.to_string()))?;
        let seq = seq
            .parse::<u64>()
            .map_err(|_| ParseError::InvalidEventId(s.to_string()))?;
        Self::new(digest, seq)
    }
}

impl TryFrom<String> for EventId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventId> for String {
    fn from(value: EventId) -> Self {
        value.to_string()
    }
}

/// Digest of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxDigest(pub String);

impl fmt::Display for TxDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Balance
// =============================================================================

/// Stake-denominated token amount in the ledger's smallest unit.
///
/// Serialized as a decimal string so the full `u64` range survives any JSON
/// reader; deserialization also accepts a plain integer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Balance(u64);

impl Balance {
    /// Zero balance.
    pub const ZERO: Self = Self(0);

    /// Wraps a raw amount.
    #[must_use]
    pub const fn new(amount: u64) -> Self {
        Self(amount)
    }

    /// Returns the raw amount.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Adds two balances, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }
}

impl From<u64> for Balance {
    fn from(amount: u64) -> Self {
        Self(amount)
    }
}

impl FromStr for Balance {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::InvalidAmount(s.to_string()));
        }
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| ParseError::InvalidAmount(s.to_string()))
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Balance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Balance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BalanceVisitor;

        impl Visitor<'_> for BalanceVisitor {
            type Value = Balance;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an unsigned 64-bit integer or its decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Balance, E> {
                Ok(Balance(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Balance, E> {
                u64::try_from(v)
                    .map(Balance)
                    .map_err(|_| E::custom(format!("negative amount {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Balance, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(BalanceVisitor)
    }
}

// =============================================================================
// Ledger-side duel state
// =============================================================================

/// Duel status as reported by the duel object on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnChainStatus {
    /// Created, waiting for an opponent.
    Open,
    /// Joined; the timed window is running or has elapsed unsettled.
    Active,
    /// Settled by a referee.
    Resolved,
    /// Withdrawn by the creator before anyone joined.
    Cancelled,
    /// No such object (never existed, or deleted).
    NotFound,
}

impl OnChainStatus {
    /// Maps the contract's numeric status field.
    #[must_use]
    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Open),
            1 => Some(Self::Active),
            2 => Some(Self::Resolved),
            3 => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns true if the duel can never be settled again.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Resolved | Self::Cancelled)
    }
}

impl fmt::Display for OnChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Active => "active",
            Self::Resolved => "resolved",
            Self::Cancelled => "cancelled",
            Self::NotFound => "not-found",
        };
        f.write_str(s)
    }
}

/// A decoded `DuelJoined` ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinEvent {
    pub event_id: EventId,
    pub duel_id: DuelId,
    pub creator: AccountId,
    pub opponent: AccountId,
    /// Ledger clock at join, milliseconds since the Unix epoch.
    pub start_time_ms: u64,
    pub duration_ms: u64,
}

// =============================================================================
// Tracked state
// =============================================================================

/// Which path captured a record's start snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    /// Captured when the join event was first ingested.
    JoinEvent,
    /// Captured by the startup reconciler after a gap in observation.
    Recovery,
}

/// Tracked lifecycle record of one joined, unsettled duel.
///
/// Fields are private and there are no setters: once built, the
/// participants, window, and start balances cannot change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuelRecord {
    duel_id: DuelId,
    creator: AccountId,
    opponent: AccountId,
    start_time_ms: u64,
    duration_ms: u64,
    creator_start_balance: Balance,
    opponent_start_balance: Balance,
    origin: RecordOrigin,
    tracked_at: DateTime<Utc>,
}

impl DuelRecord {
    /// Builds a record from a join event and the captured start balances.
    #[must_use]
    pub fn from_join(
        event: &JoinEvent,
        creator_start_balance: Balance,
        opponent_start_balance: Balance,
        origin: RecordOrigin,
        tracked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            duel_id: event.duel_id.clone(),
            creator: event.creator.clone(),
            opponent: event.opponent.clone(),
            start_time_ms: event.start_time_ms,
            duration_ms: event.duration_ms,
            creator_start_balance,
            opponent_start_balance,
            origin,
            tracked_at,
        }
    }

    #[must_use]
    pub fn duel_id(&self) -> &DuelId {
        &self.duel_id
    }

    #[must_use]
    pub fn creator(&self) -> &AccountId {
        &self.creator
    }

    #[must_use]
    pub fn opponent(&self) -> &AccountId {
        &self.opponent
    }

    #[must_use]
    pub const fn start_time_ms(&self) -> u64 {
        self.start_time_ms
    }

    #[must_use]
    pub const fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    #[must_use]
    pub const fn creator_start_balance(&self) -> Balance {
        self.creator_start_balance
    }

    #[must_use]
    pub const fn opponent_start_balance(&self) -> Balance {
        self.opponent_start_balance
    }

    #[must_use]
    pub const fn origin(&self) -> RecordOrigin {
        self.origin
    }

    #[must_use]
    pub const fn tracked_at(&self) -> DateTime<Utc> {
        self.tracked_at
    }

    /// End of the timed window, milliseconds since the Unix epoch.
    #[must_use]
    pub const fn expiry_ms(&self) -> u64 {
        self.start_time_ms.saturating_add(self.duration_ms)
    }

    /// Returns true once `now_ms` has reached the end of the window.
    #[must_use]
    pub const fn is_due(&self, now_ms: u64) -> bool {
        now_ms >= self.expiry_ms()
    }

    /// Returns true if `other` describes the same duel with the same
    /// participants and window (start balances excluded).
    #[must_use]
    pub fn same_binding(&self, other: &Self) -> bool {
        self.duel_id == other.duel_id
            && self.creator == other.creator
            && self.opponent == other.opponent
            && self.start_time_ms == other.start_time_ms
            && self.duration_ms == other.duration_ms
    }
}

/// The four balances carried by a settlement call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub duel_id: DuelId,
    pub creator_start: Balance,
    pub creator_end: Balance,
    pub opponent_start: Balance,
    pub opponent_end: Balance,
}

impl SettlementRequest {
    /// Pairs a tracked record's start snapshot with freshly measured ends.
    #[must_use]
    pub fn for_record(record: &DuelRecord, creator_end: Balance, opponent_end: Balance) -> Self {
        Self {
            duel_id: record.duel_id().clone(),
            creator_start: record.creator_start_balance(),
            creator_end,
            opponent_start: record.opponent_start_balance(),
            opponent_end,
        }
    }
}

/// Everything the store persists: tracked duels plus consumed event ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub duels: BTreeMap<DuelId, DuelRecord>,
    pub processed: BTreeSet<EventId>,
}

impl StoreSnapshot {
    /// Returns true if nothing is tracked and no event was consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.duels.is_empty() && self.processed.is_empty()
    }
}
