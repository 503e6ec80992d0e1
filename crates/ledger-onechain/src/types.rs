//! JSON-RPC wire types and strict decoders.
//!
//! Raw structs mirror the node's camelCase responses. Decoding into domain
//! types is strict: a missing field, a wrong type, a malformed id or an
//! unexpected event type rejects the item instead of defaulting it.

use crate::error::{OneChainError, Result};
use duel_referee_core::{AccountId, Balance, DuelId, EventId, JoinEvent, OnChainStatus};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

// =============================================================================
// Envelope
// =============================================================================

/// JSON-RPC 2.0 request body.
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> RpcRequest<'a> {
    #[must_use]
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// JSON-RPC 2.0 response body.
#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

impl<T> RpcResponse<T> {
    /// Unwraps the envelope into its result or the node's error.
    pub fn into_result(self) -> Result<T> {
        if let Some(err) = self.error {
            return Err(OneChainError::rpc(err.code, err.message));
        }
        self.result
            .ok_or_else(|| OneChainError::Serialization("response has neither result nor error".into()))
    }
}

// =============================================================================
// Move integers
// =============================================================================

/// Unsigned 64-bit Move value. The node renders `u64` as a decimal string
/// and smaller integers as JSON numbers; both are accepted, nothing else is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveU64(pub u64);

impl<'de> Deserialize<'de> for MoveU64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct MoveU64Visitor;

        impl Visitor<'_> for MoveU64Visitor {
            type Value = MoveU64;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an unsigned integer or its decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<MoveU64, E> {
                Ok(MoveU64(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<MoveU64, E> {
                if v.is_empty() || !v.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(E::invalid_value(de::Unexpected::Str(v), &self));
                }
                v.parse().map(MoveU64).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(MoveU64Visitor)
    }
}

// =============================================================================
// Events
// =============================================================================

/// One page of `suix_queryEvents`. Items stay untyped so a single
/// malformed event cannot poison the rest of the page.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEventPage {
    pub data: Vec<Value>,
    pub next_cursor: Option<Value>,
    #[serde(default)]
    pub has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    id: RawEventId,
    #[serde(rename = "type")]
    event_type: String,
    parsed_json: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEventId {
    tx_digest: String,
    event_seq: MoveU64,
}

/// Fields of the `duel::DuelJoined` Move event.
#[derive(Debug, Deserialize)]
struct DuelJoinedPayload {
    duel_id: DuelId,
    creator: AccountId,
    opponent: AccountId,
    start_time: MoveU64,
    duration: MoveU64,
}

/// Decodes one raw event into a [`JoinEvent`].
///
/// # Errors
/// Returns [`OneChainError::Decode`] if the event is not of
/// `expected_type` or any field is missing or malformed.
pub fn decode_join_event(value: Value, expected_type: &str) -> Result<JoinEvent> {
    let raw: RawEvent = serde_json::from_value(value)
        .map_err(|e| OneChainError::decode(format!("event envelope: {e}")))?;

    if raw.event_type != expected_type {
        return Err(OneChainError::decode(format!(
            "unexpected event type {}",
            raw.event_type
        )));
    }

    let event_id = EventId::new(raw.id.tx_digest, raw.id.event_seq.0)
        .map_err(|e| OneChainError::decode(e.to_string()))?;

    let payload: DuelJoinedPayload = serde_json::from_value(raw.parsed_json)
        .map_err(|e| OneChainError::decode(format!("event {event_id} payload: {e}")))?;

    if payload.duration.0 == 0 {
        return Err(OneChainError::decode(format!("event {event_id} has zero duration")));
    }

    Ok(JoinEvent {
        event_id,
        duel_id: payload.duel_id,
        creator: payload.creator,
        opponent: payload.opponent,
        start_time_ms: payload.start_time.0,
        duration_ms: payload.duration.0,
    })
}

// =============================================================================
// Coins
// =============================================================================

/// One page of `suix_getAllCoins`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCoinPage {
    pub data: Vec<RawCoin>,
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCoin {
    pub coin_type: String,
    pub balance: Balance,
}

// =============================================================================
// Objects
// =============================================================================

/// Response of `sui_getObject`.
#[derive(Debug, Deserialize)]
pub struct RawObjectResponse {
    pub data: Option<RawObjectData>,
    pub error: Option<RawObjectError>,
}

#[derive(Debug, Deserialize)]
pub struct RawObjectData {
    pub content: Option<RawObjectContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawObjectContent {
    pub data_type: String,
    #[serde(rename = "type")]
    pub object_type: Option<String>,
    pub fields: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RawObjectError {
    pub code: String,
}

#[derive(Debug, Deserialize)]
struct DuelFields {
    status: MoveU64,
}

/// Decodes a duel object's lifecycle status.
///
/// `duel_type_prefix` is the fully qualified struct name without type
/// arguments, e.g. `0xabc::duel::Duel`.
///
/// # Errors
/// Returns [`OneChainError::Decode`] if the object is not a duel or its
/// status field is missing or out of range.
pub fn decode_duel_status(response: RawObjectResponse, duel_type_prefix: &str) -> Result<OnChainStatus> {
    if let Some(error) = response.error {
        return match error.code.as_str() {
            "notExists" | "deleted" => Ok(OnChainStatus::NotFound),
            other => Err(OneChainError::decode(format!("object error {other}"))),
        };
    }

    let content = response
        .data
        .and_then(|data| data.content)
        .ok_or_else(|| OneChainError::decode("object content missing"))?;

    if content.data_type != "moveObject" {
        return Err(OneChainError::decode(format!(
            "expected moveObject, got {}",
            content.data_type
        )));
    }

    let object_type = content.object_type.unwrap_or_default();
    let is_duel = object_type
        .strip_prefix(duel_type_prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('<'));
    if !is_duel {
        return Err(OneChainError::decode(format!("object is a {object_type}, not a duel")));
    }

    let fields: DuelFields = content
        .fields
        .ok_or_else(|| OneChainError::decode("object fields missing"))
        .and_then(|f| serde_json::from_value(f).map_err(|e| OneChainError::decode(e.to_string())))?;

    OnChainStatus::from_code(fields.status.0)
        .ok_or_else(|| OneChainError::decode(format!("unknown duel status code {}", fields.status.0)))
}

// =============================================================================
// Transactions
// =============================================================================

/// Response of `unsafe_moveCall`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransactionBytes {
    pub tx_bytes: String,
}

/// Response of `sui_executeTransactionBlock`.
#[derive(Debug, Deserialize)]
pub struct RawExecuteResponse {
    pub digest: String,
    pub effects: Option<RawEffects>,
}

#[derive(Debug, Deserialize)]
pub struct RawEffects {
    pub status: RawExecutionStatus,
}

#[derive(Debug, Deserialize)]
pub struct RawExecutionStatus {
    pub status: String,
    pub error: Option<String>,
}

impl RawExecuteResponse {
    /// Returns the digest of a successful execution.
    ///
    /// # Errors
    /// Returns [`OneChainError::MoveAbort`] when the contract aborted,
    /// [`OneChainError::ExecutionFailed`] for other failures, and
    /// [`OneChainError::Decode`] when effects were not returned.
    pub fn into_digest(self) -> Result<String> {
        let effects = self.effects.ok_or_else(|| {
            OneChainError::decode(format!("transaction {} returned no effects", self.digest))
        })?;

        match effects.status.status.as_str() {
            "success" => Ok(self.digest),
            _ => {
                let detail = effects
                    .status
                    .error
                    .unwrap_or_else(|| format!("status {}", effects.status.status));
                if detail.contains("MoveAbort") {
                    Err(OneChainError::MoveAbort(detail))
                } else {
                    Err(OneChainError::ExecutionFailed(detail))
                }
            }
        }
    }
}
