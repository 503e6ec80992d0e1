//! Core types, traits, and configuration for the duel referee.
//!
//! Every other crate in the workspace speaks in these terms: the
//! [`LedgerGateway`] and [`DuelStore`] seams, the [`DuelRecord`] data model,
//! and the error taxonomy in [`error`].

pub mod clock;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod traits;
pub mod types;

pub use clock::{ManualClock, SystemClock};
pub use config::{
    IngestionConfig, LeaseConfig, LedgerConfig, RefereeConfig, ScheduleConfig, StoreBackend,
    StoreConfig,
};
pub use config_loader::{ConfigLoader, DEFAULT_CONFIG_PATH};
pub use error::{LedgerError, LedgerResult, ParseError, PersistenceError, StateInvariantViolation};
pub use traits::{Clock, DuelStore, LedgerGateway};
pub use types::{
    AccountId, Balance, DuelId, DuelRecord, EventId, JoinEvent, OnChainStatus, RecordOrigin,
    SettlementRequest, StoreSnapshot, TxDigest,
};
