// crates/woo-daemon/src/config.rs
//
// Runtime configuration for the WOO staking daemon.
// Loaded from a TOML file or populated with sensible defaults.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::time::Duration;

use serde::Deserialize;

use woo_core::math::PRECISION;
use woo_core::types::{Address, Amount, DomainId, TokenId, ONE_TOKEN};
use woo_rewards::{DEFAULT_BOOST_RATIO_BPS, DEFAULT_COOLDOWN_SECS};
use woo_staking::DEFAULT_MP_REWARD_RATE_BPS;

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Directory for local data (RocksDB).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds between simulated blocks on the home domain.
    #[serde(default = "default_block_interval_secs")]
    pub block_interval_secs: u64,

    /// Seconds between state snapshots.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,

    /// "memory" or "rocksdb".
    #[serde(default = "default_storage")]
    pub storage: String,

    #[serde(default)]
    pub manager: ManagerSection,

    #[serde(default)]
    pub rewarders: Vec<RewarderSection>,

    /// Token -> price in WOO-denominated units for the fixed-price swap
    /// oracle, e.g. `"0x..11" = 2.5`.
    #[serde(default)]
    pub prices: BTreeMap<TokenId, f64>,

    #[serde(default)]
    pub bridge: BridgeSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManagerSection {
    #[serde(default = "default_manager_address")]
    pub address: Address,
    #[serde(default = "default_owner")]
    pub owner: Address,
    #[serde(default = "default_woo_token")]
    pub woo_token: TokenId,
    #[serde(default = "default_woo_vault")]
    pub woo_vault: Address,
    /// Identity of the local staking entry point.
    #[serde(default = "default_local_address")]
    pub local_address: Address,
    #[serde(default = "default_mp_reward_rate_bps")]
    pub mp_reward_rate_bps: Amount,
    #[serde(default = "default_boost_ratio_bps")]
    pub boost_ratio_bps: u32,
    #[serde(default = "default_compound_cooldown_secs")]
    pub compound_cooldown_secs: u64,
    /// Seconds between auto-compound runs over the compounder members.
    #[serde(default = "default_compound_interval_secs")]
    pub compound_interval_secs: u64,
    #[serde(default = "default_external_call_timeout_ms")]
    pub external_call_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewarderSection {
    pub token: TokenId,
    /// Ledger account the rewards are paid from.
    pub vault: Address,
    /// Whole tokens per block.
    pub reward_per_block: Amount,
    /// Whole tokens minted into the vault at startup.
    #[serde(default)]
    pub funding: Amount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSection {
    #[serde(default = "default_home_domain")]
    pub home_domain: DomainId,
    #[serde(default = "default_controller_address")]
    pub controller_address: Address,
    #[serde(default)]
    pub remotes: Vec<RemoteSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSection {
    pub domain: DomainId,
    pub proxy_address: Address,
    /// Controller the proxy trusts; must be the home controller.
    pub controller_address: Address,
}

fn default_data_dir() -> String {
    "~/.woo/data".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_block_interval_secs() -> u64 {
    2
}

fn default_snapshot_interval_secs() -> u64 {
    60
}

fn default_storage() -> String {
    "memory".to_string()
}

fn default_manager_address() -> Address {
    Address::from_low_u8(0x20)
}

fn default_owner() -> Address {
    Address::from_low_u8(0x01)
}

fn default_woo_token() -> TokenId {
    Address::from_low_u8(0x10)
}

fn default_woo_vault() -> Address {
    Address::from_low_u8(0x21)
}

fn default_local_address() -> Address {
    Address::from_low_u8(0x22)
}

fn default_mp_reward_rate_bps() -> Amount {
    DEFAULT_MP_REWARD_RATE_BPS
}

fn default_boost_ratio_bps() -> u32 {
    DEFAULT_BOOST_RATIO_BPS
}

fn default_compound_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

fn default_compound_interval_secs() -> u64 {
    3_600
}

fn default_external_call_timeout_ms() -> u64 {
    10_000
}

fn default_home_domain() -> DomainId {
    110
}

fn default_controller_address() -> Address {
    Address::from_low_u8(0x30)
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            address: default_manager_address(),
            owner: default_owner(),
            woo_token: default_woo_token(),
            woo_vault: default_woo_vault(),
            local_address: default_local_address(),
            mp_reward_rate_bps: default_mp_reward_rate_bps(),
            boost_ratio_bps: default_boost_ratio_bps(),
            compound_cooldown_secs: default_compound_cooldown_secs(),
            compound_interval_secs: default_compound_interval_secs(),
            external_call_timeout_ms: default_external_call_timeout_ms(),
        }
    }
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            home_domain: default_home_domain(),
            controller_address: default_controller_address(),
            remotes: Vec::new(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            block_interval_secs: default_block_interval_secs(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
            storage: default_storage(),
            manager: ManagerSection::default(),
            rewarders: Vec::new(),
            prices: BTreeMap::new(),
            bridge: BridgeSection::default(),
        }
    }
}

impl ManagerSection {
    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_millis(self.external_call_timeout_ms)
    }
}

impl RewarderSection {
    pub fn reward_per_block_units(&self) -> Amount {
        self.reward_per_block.saturating_mul(ONE_TOKEN)
    }

    pub fn funding_units(&self) -> Amount {
        self.funding.saturating_mul(ONE_TOKEN)
    }
}

/// Convert a decimal price to `PRECISION` fixed point, keeping six decimals.
pub fn price_units(price: f64) -> Option<Amount> {
    if !price.is_finite() || price <= 0.0 {
        return None;
    }
    let micros = (price * 1_000_000.0).round();
    if micros < 1.0 || micros > u64::MAX as f64 {
        return None;
    }
    Some(micros as Amount * (PRECISION / 1_000_000))
}

impl DaemonConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Reject combinations the wiring cannot honor.
    pub fn validate(&self) -> Result<(), String> {
        if self.block_interval_secs == 0 {
            return Err("block_interval_secs must be positive".to_string());
        }
        if self.snapshot_interval_secs == 0 || self.manager.compound_interval_secs == 0 {
            return Err("snapshot and compound intervals must be positive".to_string());
        }
        if self.storage != "memory" && self.storage != "rocksdb" {
            return Err(format!("unknown storage backend '{}'", self.storage));
        }
        for (token, price) in &self.prices {
            if price_units(*price).is_none() {
                return Err(format!("price {} for {} is not usable", price, token));
            }
        }
        let mut vaults = BTreeSet::new();
        for rewarder in &self.rewarders {
            if !vaults.insert(rewarder.vault) {
                return Err(format!("rewarder vault {} configured twice", rewarder.vault));
            }
        }
        let mut domains = BTreeSet::new();
        for remote in &self.bridge.remotes {
            if remote.domain == self.bridge.home_domain {
                return Err(format!("remote domain {} is the home domain", remote.domain));
            }
            if !domains.insert(remote.domain) {
                return Err(format!("remote domain {} configured twice", remote.domain));
            }
            if remote.controller_address != self.bridge.controller_address {
                return Err(format!(
                    "remote domain {} trusts {} but the home controller is {}",
                    remote.domain, remote.controller_address, self.bridge.controller_address
                ));
            }
        }
        Ok(())
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}/{}", home.display(), rest);
        }
    }
    path.to_string()
}
