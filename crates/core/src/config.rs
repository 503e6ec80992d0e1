use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RefereeConfig {
    pub ledger: LedgerConfig,
    pub schedule: ScheduleConfig,
    pub ingestion: IngestionConfig,
    pub store: StoreConfig,
    pub lease: LeaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub rpc_url: String,
    /// Package that publishes the `duel` module.
    pub package_id: String,
    /// Capability object authorizing `duel::resolve`.
    pub admin_cap_id: String,
    /// Stake coin type argument of `duel::resolve`.
    pub coin_type: String,
    /// Shared clock object passed to the settlement call.
    pub clock_object_id: String,
    /// Environment variable holding the admin signing key.
    /// The key itself is never read from a config file.
    pub admin_key_env: String,
    pub gas_budget: u64,
    pub request_timeout_secs: u64,
    pub requests_per_minute: u32,
    /// Coin types summed into a participant's balance; empty sums all.
    pub balance_coin_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub ingest_interval_secs: u64,
    pub expiry_scan_interval_secs: u64,
    pub persist_interval_secs: u64,
    /// Upper bound on any single ledger call.
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub event_page_size: usize,
    /// Wider window queried once at startup to cover downtime.
    pub recovery_page_size: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Json,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// JSON file path, or SQLite database path for the `sqlite` backend.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub ttl_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://rpc-testnet.onelabs.cc:443".to_string(),
            package_id: String::new(),
            admin_cap_id: String::new(),
            coin_type: "0x2::oct::OCT".to_string(),
            clock_object_id: "0x6".to_string(),
            admin_key_env: "REFEREE_ADMIN_PRIVATE_KEY".to_string(),
            gas_budget: 10_000_000,
            request_timeout_secs: 20,
            requests_per_minute: 600,
            balance_coin_types: Vec::new(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            ingest_interval_secs: 5,
            expiry_scan_interval_secs: 10,
            persist_interval_secs: 30,
            call_timeout_secs: 30,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            event_page_size: 50,
            recovery_page_size: 200,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Json,
            path: PathBuf::from("data/referee-state.json"),
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("data/referee.lease"),
            ttl_secs: 90,
        }
    }
}

impl ScheduleConfig {
    #[must_use]
    pub const fn ingest_interval(&self) -> Duration {
        Duration::from_secs(self.ingest_interval_secs)
    }

    #[must_use]
    pub const fn expiry_scan_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_scan_interval_secs)
    }

    #[must_use]
    pub const fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }

    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl LeaseConfig {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl RefereeConfig {
    /// Checks values that would otherwise fail deep inside the service.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending option.
    pub fn validate(&self) -> Result<()> {
        let ledger = &self.ledger;
        if !(ledger.rpc_url.starts_with("http://") || ledger.rpc_url.starts_with("https://")) {
            bail!("ledger.rpc_url must be an http(s) URL, got {:?}", ledger.rpc_url);
        }
        for (name, value) in [
            ("ledger.package_id", &ledger.package_id),
            ("ledger.admin_cap_id", &ledger.admin_cap_id),
            ("ledger.clock_object_id", &ledger.clock_object_id),
        ] {
            if !value.starts_with("0x") || value.len() < 3 {
                bail!("{name} must be a 0x-prefixed object id, got {value:?}");
            }
        }
        if ledger.coin_type.is_empty() {
            bail!("ledger.coin_type must not be empty");
        }
        if ledger.admin_key_env.is_empty() {
            bail!("ledger.admin_key_env must name an environment variable");
        }
        if ledger.requests_per_minute == 0 {
            bail!("ledger.requests_per_minute must be positive");
        }

        let schedule = &self.schedule;
        for (name, secs) in [
            ("schedule.ingest_interval_secs", schedule.ingest_interval_secs),
            ("schedule.expiry_scan_interval_secs", schedule.expiry_scan_interval_secs),
            ("schedule.persist_interval_secs", schedule.persist_interval_secs),
            ("schedule.call_timeout_secs", schedule.call_timeout_secs),
        ] {
            if secs == 0 {
                bail!("{name} must be positive");
            }
        }

        let ingestion = &self.ingestion;
        if ingestion.event_page_size == 0 {
            bail!("ingestion.event_page_size must be positive");
        }
        if ingestion.recovery_page_size < ingestion.event_page_size {
            bail!(
                "ingestion.recovery_page_size ({}) must be at least event_page_size ({})",
                ingestion.recovery_page_size,
                ingestion.event_page_size
            );
        }

        if self.store.backend != StoreBackend::Memory && self.store.path.as_os_str().is_empty() {
            bail!("store.path must be set for the {:?} backend", self.store.backend);
        }

        if self.lease.enabled && self.lease.ttl_secs < 3 {
            bail!("lease.ttl_secs must be at least 3");
        }

        Ok(())
    }
}
