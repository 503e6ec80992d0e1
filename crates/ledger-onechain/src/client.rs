//! OneChain JSON-RPC client with rate limiting.
//!
//! Implements [`LedgerGateway`] on top of a full node's JSON-RPC endpoint:
//! join events via `suix_queryEvents`, balances via `suix_getAllCoins`,
//! duel status via `sui_getObject`, and settlement via `unsafe_moveCall`
//! followed by a locally signed `sui_executeTransactionBlock`.
//!
//! # Example
//!
//! ```ignore
//! use duel_referee_onechain::{AdminSigner, OneChainClient, OneChainClientConfig};
//!
//! let config = OneChainClientConfig::from_ledger(&referee_config.ledger)?;
//! let signer = AdminSigner::from_env(&referee_config.ledger.admin_key_env)?;
//! let client = OneChainClient::new(config, Some(signer))?;
//!
//! let events = client.query_join_events(50).await?;
//! ```

use crate::error::{OneChainError, Result};
use crate::signer::AdminSigner;
use crate::types::{
    decode_duel_status, decode_join_event, RawCoinPage, RawEventPage, RawExecuteResponse,
    RawObjectResponse, RawTransactionBytes, RpcRequest, RpcResponse,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use duel_referee_core::{
    AccountId, Balance, DuelId, JoinEvent, LedgerConfig, LedgerGateway, LedgerResult,
    OnChainStatus, SettlementRequest, TxDigest,
};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

// =============================================================================
// Constants
// =============================================================================

/// OneChain testnet RPC endpoint.
pub const ONECHAIN_TESTNET_URL: &str = "https://rpc-testnet.onelabs.cc:443";

/// Largest page the node serves for event and coin queries.
const MAX_PAGE_SIZE: usize = 50;

/// Upper bound on coin pages read for one balance.
const MAX_COIN_PAGES: usize = 100;

/// Move module holding the duel contract.
const DUEL_MODULE: &str = "duel";

/// Entry function that settles a duel.
const RESOLVE_FUNCTION: &str = "resolve";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the OneChain client.
#[derive(Debug, Clone)]
pub struct OneChainClientConfig {
    /// JSON-RPC endpoint.
    pub rpc_url: String,

    /// Package publishing the duel module.
    pub package_id: String,

    /// Admin capability object passed to `resolve`.
    pub admin_cap_id: String,

    /// Stake coin type argument.
    pub coin_type: String,

    /// Shared clock object.
    pub clock_object_id: String,

    /// Gas budget for the settlement transaction.
    pub gas_budget: u64,

    /// Requests per minute limit.
    pub requests_per_minute: NonZeroU32,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Coin types counted toward a balance; empty counts every coin.
    pub balance_coin_types: Vec<String>,
}

impl Default for OneChainClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: ONECHAIN_TESTNET_URL.to_string(),
            package_id: String::new(),
            admin_cap_id: String::new(),
            coin_type: "0x2::oct::OCT".to_string(),
            clock_object_id: "0x6".to_string(),
            gas_budget: 10_000_000,
            requests_per_minute: nonzero!(600u32),
            timeout_secs: 20,
            balance_coin_types: Vec::new(),
        }
    }
}

impl OneChainClientConfig {
    /// Builds the client configuration from the `[ledger]` section.
    ///
    /// # Errors
    /// Returns [`OneChainError::Configuration`] for a zero rate limit.
    pub fn from_ledger(ledger: &LedgerConfig) -> Result<Self> {
        let requests_per_minute = NonZeroU32::new(ledger.requests_per_minute).ok_or_else(|| {
            OneChainError::Configuration("requests_per_minute must be positive".into())
        })?;

        Ok(Self {
            rpc_url: ledger.rpc_url.clone(),
            package_id: ledger.package_id.clone(),
            admin_cap_id: ledger.admin_cap_id.clone(),
            coin_type: ledger.coin_type.clone(),
            clock_object_id: ledger.clock_object_id.clone(),
            gas_budget: ledger.gas_budget,
            requests_per_minute,
            timeout_secs: ledger.request_timeout_secs,
            balance_coin_types: ledger.balance_coin_types.clone(),
        })
    }

    /// Sets the RPC endpoint.
    #[must_use]
    pub fn with_rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = url.into();
        self
    }

    /// Sets the contract object ids.
    #[must_use]
    pub fn with_contract(
        mut self,
        package_id: impl Into<String>,
        admin_cap_id: impl Into<String>,
    ) -> Self {
        self.package_id = package_id.into();
        self.admin_cap_id = admin_cap_id.into();
        self
    }

    /// Restricts which coin types count toward a balance.
    #[must_use]
    pub fn with_balance_coin_types(mut self, coin_types: Vec<String>) -> Self {
        self.balance_coin_types = coin_types;
        self
    }
}

/// Expands a 0x-prefixed address to the 64-digit form the node uses in
/// type strings.
fn canonical_address(raw: &str) -> Result<String> {
    let digits = raw
        .strip_prefix("0x")
        .filter(|d| !d.is_empty() && d.len() <= 64 && d.chars().all(|c| c.is_ascii_hexdigit()))
        .ok_or_else(|| OneChainError::Configuration(format!("invalid package id {raw:?}")))?;
    Ok(format!("0x{:0>64}", digits.to_ascii_lowercase()))
}

// =============================================================================
// OneChainClient
// =============================================================================

/// OneChain JSON-RPC client.
///
/// Reads need no credentials. Settlement requires an [`AdminSigner`]; a
/// client built without one refuses to submit.
pub struct OneChainClient {
    config: OneChainClientConfig,
    http: Client,
    rate_limiter: Arc<
        RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
    signer: Option<AdminSigner>,
    next_request_id: AtomicU64,
    join_event_type: String,
    duel_type_prefix: String,
}

impl std::fmt::Debug for OneChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneChainClient")
            .field("rpc_url", &self.config.rpc_url)
            .field("package_id", &self.config.package_id)
            .field("signer", &self.signer.as_ref().map(AdminSigner::address))
            .finish_non_exhaustive()
    }
}

impl OneChainClient {
    /// Creates a new client.
    ///
    /// # Errors
    /// Returns error if the package id is malformed or the HTTP client
    /// cannot be built.
    pub fn new(config: OneChainClientConfig, signer: Option<AdminSigner>) -> Result<Self> {
        let package = canonical_address(&config.package_id)?;

        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OneChainError::Network(format!("failed to build HTTP client: {e}")))?;

        let quota = Quota::per_minute(config.requests_per_minute);
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            join_event_type: format!("{package}::{DUEL_MODULE}::DuelJoined"),
            duel_type_prefix: format!("{package}::{DUEL_MODULE}::Duel"),
            config,
            http,
            rate_limiter,
            signer,
            next_request_id: AtomicU64::new(1),
        })
    }

    /// Returns the RPC endpoint.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.config.rpc_url
    }

    /// Returns the admin address, if a signer is loaded.
    #[must_use]
    pub fn admin_address(&self) -> Option<&AccountId> {
        self.signer.as_ref().map(AdminSigner::address)
    }

    /// Waits for the rate limiter and performs one JSON-RPC call.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "RPC request");

        let response = self
            .http
            .post(&self.config.rpc_url)
            .json(&RpcRequest::new(id, method, params))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(5);
            return Err(OneChainError::rate_limit(retry_after));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OneChainError::api(status.as_u16(), text));
        }

        response.json::<RpcResponse<T>>().await?.into_result()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetches up to `limit` of the newest `DuelJoined` events, newest first.
    ///
    /// Events that fail strict decoding are logged and skipped.
    ///
    /// # Errors
    /// Returns error if any page cannot be fetched.
    pub async fn fetch_join_events(&self, limit: usize) -> Result<Vec<JoinEvent>> {
        let filter = json!({ "MoveEventType": self.join_event_type });
        let mut events = Vec::with_capacity(limit.min(MAX_PAGE_SIZE));
        let mut cursor = Value::Null;
        let mut remaining = limit;

        while remaining > 0 {
            let page_size = remaining.min(MAX_PAGE_SIZE);
            let page: RawEventPage = self
                .call("suix_queryEvents", json!([filter, cursor, page_size, true]))
                .await?;

            remaining = remaining.saturating_sub(page.data.len().max(1));
            for raw in page.data {
                match decode_join_event(raw, &self.join_event_type) {
                    Ok(event) => events.push(event),
                    Err(e) => warn!(error = %e, "Dropping malformed join event"),
                }
            }

            match page.next_cursor {
                Some(next) if page.has_next_page && !next.is_null() => cursor = next,
                _ => break,
            }
        }

        debug!(count = events.len(), limit, "Fetched join events");
        Ok(events)
    }

    /// Sums the owner's coin balances across all pages.
    ///
    /// # Errors
    /// Returns error if a page cannot be fetched, the sum overflows, or the
    /// owner holds more coin pages than the client is willing to read.
    pub async fn fetch_balance(&self, owner: &AccountId) -> Result<Balance> {
        let mut total = Balance::ZERO;
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_COIN_PAGES {
            let page: RawCoinPage = self
                .call(
                    "suix_getAllCoins",
                    json!([owner.as_str(), cursor, MAX_PAGE_SIZE]),
                )
                .await?;

            for coin in page.data.iter().filter(|c| self.counts_toward_balance(&c.coin_type)) {
                total = total.checked_add(coin.balance).ok_or_else(|| {
                    OneChainError::decode(format!("balance of {owner} overflows u64"))
                })?;
            }

            match page.next_cursor {
                Some(next) if page.has_next_page => cursor = Some(next),
                _ => return Ok(total),
            }
        }

        Err(OneChainError::decode(format!(
            "{owner} holds more than {MAX_COIN_PAGES} pages of coins"
        )))
    }

    fn counts_toward_balance(&self, coin_type: &str) -> bool {
        self.config.balance_coin_types.is_empty()
            || self.config.balance_coin_types.iter().any(|t| t == coin_type)
    }

    /// Reads the duel object's status field.
    ///
    /// # Errors
    /// Returns error if the object cannot be fetched or is not a duel.
    pub async fn fetch_duel_status(&self, duel_id: &DuelId) -> Result<OnChainStatus> {
        let response: RawObjectResponse = self
            .call(
                "sui_getObject",
                json!([duel_id.as_str(), { "showContent": true, "showType": true }]),
            )
            .await?;
        decode_duel_status(response, &self.duel_type_prefix)
    }

    // =========================================================================
    // Settlement
    // =========================================================================

    /// Builds, signs, and executes the `duel::resolve` transaction.
    ///
    /// # Errors
    /// Returns [`OneChainError::MoveAbort`] if the contract refused the
    /// call, or another variant if the outcome is unknown.
    pub async fn execute_settlement(&self, request: &SettlementRequest) -> Result<String> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| OneChainError::Configuration("no admin signer loaded".into()))?;

        let arguments = json!([
            self.config.admin_cap_id,
            request.duel_id.as_str(),
            request.creator_start.to_string(),
            request.creator_end.to_string(),
            request.opponent_start.to_string(),
            request.opponent_end.to_string(),
            self.config.clock_object_id,
        ]);

        let built: RawTransactionBytes = self
            .call(
                "unsafe_moveCall",
                json!([
                    signer.address().as_str(),
                    self.config.package_id,
                    DUEL_MODULE,
                    RESOLVE_FUNCTION,
                    [self.config.coin_type],
                    arguments,
                    Value::Null,
                    self.config.gas_budget.to_string(),
                ]),
            )
            .await?;

        let tx_bytes = BASE64
            .decode(&built.tx_bytes)
            .map_err(|e| OneChainError::Serialization(format!("txBytes is not base64: {e}")))?;
        let signature = signer.sign_transaction(&tx_bytes);

        let executed: RawExecuteResponse = self
            .call(
                "sui_executeTransactionBlock",
                json!([
                    built.tx_bytes,
                    [signature],
                    { "showEffects": true },
                    "WaitForLocalExecution",
                ]),
            )
            .await?;

        executed.into_digest()
    }
}

#[async_trait]
impl LedgerGateway for OneChainClient {
    async fn query_join_events(&self, limit: usize) -> LedgerResult<Vec<JoinEvent>> {
        self.fetch_join_events(limit)
            .await
            .map_err(OneChainError::into_fetch)
    }

    async fn get_balance(&self, account: &AccountId) -> LedgerResult<Balance> {
        self.fetch_balance(account)
            .await
            .map_err(OneChainError::into_fetch)
    }

    async fn get_duel_status(&self, duel_id: &DuelId) -> LedgerResult<OnChainStatus> {
        self.fetch_duel_status(duel_id)
            .await
            .map_err(OneChainError::into_fetch)
    }

    async fn submit_settlement(&self, request: &SettlementRequest) -> LedgerResult<TxDigest> {
        match self.execute_settlement(request).await {
            Ok(digest) => {
                info!(duel = %request.duel_id, digest = %digest, "Settlement transaction executed");
                Ok(TxDigest(digest))
            }
            Err(e) => Err(e.into_submission()),
        }
    }
}
