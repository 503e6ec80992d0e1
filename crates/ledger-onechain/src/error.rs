//! Error types for the OneChain JSON-RPC gateway.
//!
//! [`OneChainError`] keeps the transport detail; the referee only ever sees
//! the coarser [`LedgerError`] produced by [`OneChainError::into_fetch`] and
//! [`OneChainError::into_submission`].

use duel_referee_core::LedgerError;
use thiserror::Error;

/// Errors that can occur when talking to a OneChain full node.
#[derive(Debug, Error)]
pub enum OneChainError {
    /// HTTP request failed before a response arrived.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Node answered with 429.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimit {
        /// Seconds to wait before retry.
        retry_after_secs: u64,
    },

    /// Non-success HTTP status.
    #[error("HTTP error: {status_code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Response body, if any.
        message: String,
    },

    /// JSON-RPC error object in an otherwise successful response.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the node.
        message: String,
    },

    /// Response body did not match the expected envelope.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Payload was well-formed JSON but failed strict schema checks.
    #[error("decode error: {0}")]
    Decode(String),

    /// Admin key could not be loaded or used.
    #[error("signing error: {0}")]
    Signing(String),

    /// Client misconfiguration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transaction executed but the Move call aborted.
    #[error("move abort: {0}")]
    MoveAbort(String),

    /// Transaction executed and failed for a reason other than an abort.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

impl OneChainError {
    /// Creates an HTTP error from status code and body.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Creates a JSON-RPC error.
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    /// Creates a rate limit error.
    pub fn rate_limit(retry_after_secs: u64) -> Self {
        Self::RateLimit { retry_after_secs }
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Maps a read-path failure to the referee's error taxonomy.
    #[must_use]
    pub fn into_fetch(self) -> LedgerError {
        LedgerError::transient(self.to_string())
    }

    /// Maps a settlement-path failure to the referee's error taxonomy.
    ///
    /// Only a Move abort counts as the contract refusing the settlement;
    /// every other failure leaves the outcome unknown.
    #[must_use]
    pub fn into_submission(self) -> LedgerError {
        match self {
            Self::MoveAbort(detail) => LedgerError::rejected(detail),
            other => LedgerError::submission(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for OneChainError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else if err.is_decode() {
            Self::Serialization(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for OneChainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for OneChain operations.
pub type Result<T> = std::result::Result<T, OneChainError>;
