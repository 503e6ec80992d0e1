//! OneChain ledger gateway for the duel referee.
//!
//! Talks JSON-RPC to a OneChain full node: reads `DuelJoined` events,
//! participant balances, and duel object status, and submits the
//! `duel::resolve` settlement signed with the referee's admin key.

pub mod client;
pub mod error;
pub mod signer;
pub mod types;

pub use client::{OneChainClient, OneChainClientConfig, ONECHAIN_TESTNET_URL};
pub use error::{OneChainError, Result};
pub use signer::AdminSigner;
