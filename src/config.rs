//! Configuration module for the sniper engine
//!
//! Static configuration is loaded once from TOML at startup. Strategy knobs
//! that change during the day live in the hot-reloaded YAML files instead
//! (see `hot_config`); this file only records where those files are.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid address '{value}' in {field}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// RPC endpoint used for queries and plain submission
    pub rpc: RpcConfig,

    /// Wallet configuration
    pub wallet: WalletConfig,

    /// Durable nonce accounts
    pub nonce: NonceConfig,

    /// Relay channels raced on every order
    pub relay: RelayConfig,

    /// Redundant swap event feeds
    pub feeds: FeedsConfig,

    /// Engine limits and caches
    pub engine: EngineConfig,

    /// Session and sizing thresholds
    pub policy: PolicyConfig,

    /// Hot-reloaded strategy files
    pub hot_config: HotConfigPaths,

    /// Monitoring and metrics
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub http_url: String,
    pub ws_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Path to a keypair file (JSON array or raw 64 bytes)
    pub keypair_path: Option<String>,

    /// Environment variable holding a base58 private key, used when no path is set
    pub private_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    /// Nonce account addresses
    pub accounts: Vec<String>,

    /// Nonce authority, defaults to the wallet
    pub authority: Option<String>,

    /// Fallback poll interval in milliseconds
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bundle_endpoints: Vec<String>,
    pub bundle_tip_accounts: Vec<String>,

    pub grpc_endpoints: Vec<String>,
    /// Environment variable holding the gRPC relay api key
    pub grpc_api_key_env: String,
    pub grpc_tip_accounts: Vec<String>,

    pub http_urls: Vec<String>,
    /// Environment variable holding the HTTP relay api key
    pub http_api_key_env: String,
    pub http_tip_accounts: Vec<String>,

    /// Per-channel submission timeout in milliseconds
    pub race_timeout_ms: u64,

    /// Overall confirmation timeout in milliseconds
    pub confirm_timeout_ms: u64,

    /// Tip on buys, lamports
    pub buy_tip_cap: u64,

    /// Tip on sells, lamports
    pub sell_tip: u64,

    /// Tip passed to the aggregator route, lamports
    pub aggregator_tip: u64,

    /// Priority fee in micro-lamports per compute unit
    pub priority_fee: u64,

    pub aggregator_url: String,
    pub aggregator_rps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    /// WebSocket feed URLs, one ingest worker each
    pub urls: Vec<String>,

    /// Optional frame sent after connecting
    pub subscribe: Option<String>,

    /// Feed channel capacity
    pub buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Buy-count ceiling across live sessions
    pub max_concurrent_buys: u64,

    /// Per-token buy cooldown in milliseconds
    pub cooldown_ms: u64,

    /// Wallet balance below which no trigger fires, lamports
    pub balance_floor: u64,

    /// Smallest buy ever sent, SOL
    pub min_buy_sol: f64,

    /// Expected signature volume for the dedup filter
    pub dedup_capacity: usize,

    /// Target false-positive rate for the dedup filter
    pub dedup_fpr: f64,

    /// Recently-bought token cache
    pub buy_cache_capacity: usize,
    pub buy_cache_ttl_secs: u64,

    /// Mirror the fixed scm address with aggregator sells
    pub scm_enabled: bool,

    /// Periodic statistics log interval in seconds
    pub stats_interval_secs: u64,

    /// Where closed positions are appended
    pub profit_csv: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Sell everything when price falls below this fraction of the last sell price
    pub stop_loss_ratio: f64,

    /// Prefer break-even over a full exit above this multiple of the buy price
    pub break_even_gain: f64,

    /// Take-profit ladder: (multiple of buy price, fraction of bought amount)
    pub take_profit: Vec<(f64, f64)>,
    pub take_profit_interval_ms: u64,

    /// Partial counterparty exits needed before a full sell
    pub counter_signal_limit: u32,

    /// Mint sessions: someone else must buy within this window after us
    pub follow_window_ms: u64,
    pub follow_check_ms: u64,

    /// Hold adjustments per observed trade
    pub hold_extend_ms: f64,
    pub hold_shrink_ms: f64,

    pub balance_poll_ms: u64,
    pub close_check_ms: u64,

    /// Sell retry policy
    pub sell_retry_ceiling: u32,
    pub initial_sell_slippage: f64,
    pub fallback_slippage: f64,

    /// Profit feedback
    pub loss_threshold_pct: f64,
    pub big_win_pct: f64,
    pub multiplier_cap: f64,
    pub multiplier_floor: f64,
    pub big_win_grace_secs: u64,
    pub profit_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotConfigPaths {
    pub strategy: PathBuf,
    pub blacklist: PathBuf,
    pub robots: PathBuf,
    pub smart: PathBuf,
    /// Modification-time poll interval in seconds
    pub reload_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    pub enable_metrics: bool,

    /// Metrics port
    pub metrics_port: u16,
}

// Default value functions
fn default_rpc_timeout() -> u64 { 8 }
fn default_private_key_env() -> String { "PRIVATE_KEY".to_string() }
fn default_nonce_poll_ms() -> u64 { 1_000 }
fn default_race_timeout_ms() -> u64 { 8_000 }
fn default_confirm_timeout_ms() -> u64 { 8_000 }
fn default_buy_tip_cap() -> u64 { 1_000_000 }
fn default_sell_tip() -> u64 { 100_000 }
fn default_aggregator_tip() -> u64 { 1_000_000 }
fn default_priority_fee() -> u64 { 100_000 }
fn default_aggregator_rps() -> u32 { 1 }
fn default_feed_buffer() -> usize { 4_096 }
fn default_max_buys() -> u64 { 100 }
fn default_cooldown_ms() -> u64 { 2_000 }
fn default_balance_floor() -> u64 { 500_000_000 }
fn default_min_buy_sol() -> f64 { 0.05 }
fn default_dedup_capacity() -> usize { 1_000_000 }
fn default_dedup_fpr() -> f64 { 0.001 }
fn default_buy_cache_capacity() -> usize { 5 }
fn default_buy_cache_ttl() -> u64 { 600 }
fn default_stats_interval() -> u64 { 60 }
fn default_reload_interval() -> u64 { 60 }
fn default_metrics_port() -> u16 { 9090 }
fn default_true() -> bool { true }

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            http_url: "https://api.mainnet-beta.solana.com".to_string(),
            ws_url: "wss://api.mainnet-beta.solana.com".to_string(),
            timeout_secs: default_rpc_timeout(),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keypair_path: None,
            private_key_env: default_private_key_env(),
        }
    }
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            authority: None,
            poll_interval_ms: default_nonce_poll_ms(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bundle_endpoints: Vec::new(),
            bundle_tip_accounts: Vec::new(),
            grpc_endpoints: Vec::new(),
            grpc_api_key_env: "GRPC_RELAY_API_KEY".to_string(),
            grpc_tip_accounts: Vec::new(),
            http_urls: Vec::new(),
            http_api_key_env: "HTTP_RELAY_API_KEY".to_string(),
            http_tip_accounts: Vec::new(),
            race_timeout_ms: default_race_timeout_ms(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
            buy_tip_cap: default_buy_tip_cap(),
            sell_tip: default_sell_tip(),
            aggregator_tip: default_aggregator_tip(),
            priority_fee: default_priority_fee(),
            aggregator_url: crate::rpc_manager::aggregator::DEFAULT_BASE_URL.to_string(),
            aggregator_rps: default_aggregator_rps(),
        }
    }
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            subscribe: None,
            buffer: default_feed_buffer(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_buys: default_max_buys(),
            cooldown_ms: default_cooldown_ms(),
            balance_floor: default_balance_floor(),
            min_buy_sol: default_min_buy_sol(),
            dedup_capacity: default_dedup_capacity(),
            dedup_fpr: default_dedup_fpr(),
            buy_cache_capacity: default_buy_cache_capacity(),
            buy_cache_ttl_secs: default_buy_cache_ttl(),
            scm_enabled: false,
            stats_interval_secs: default_stats_interval(),
            profit_csv: PathBuf::from("profit.csv"),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            stop_loss_ratio: 0.8,
            break_even_gain: 1.5,
            take_profit: vec![(1.5, 0.8), (4.0, 1.0), (8.0, 1.0)],
            take_profit_interval_ms: 400,
            counter_signal_limit: 2,
            follow_window_ms: 1_000,
            follow_check_ms: 1_200,
            hold_extend_ms: 100.0,
            hold_shrink_ms: 200.0,
            balance_poll_ms: 1_000,
            close_check_ms: 8_000,
            sell_retry_ceiling: 10,
            initial_sell_slippage: 10.0,
            fallback_slippage: 200.0,
            loss_threshold_pct: -5.0,
            big_win_pct: 50.0,
            multiplier_cap: 5.0,
            multiplier_floor: 1.0,
            big_win_grace_secs: 180,
            profit_window: 5,
        }
    }
}

impl Default for HotConfigPaths {
    fn default() -> Self {
        Self {
            strategy: PathBuf::from("config/strategy.yaml"),
            blacklist: PathBuf::from("config/mint.yaml"),
            robots: PathBuf::from("config/robot.yaml"),
            smart: PathBuf::from("config/smart_addresses.yaml"),
            reload_interval_secs: default_reload_interval(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: default_true(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration after applying a `.env` file, if present
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_file(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.engine.dedup_fpr) || self.engine.dedup_fpr == 0.0 {
            return Err(ConfigError::Invalid(format!(
                "engine.dedup_fpr must be in (0, 1), got {}",
                self.engine.dedup_fpr
            )));
        }
        if self.policy.multiplier_floor > self.policy.multiplier_cap {
            return Err(ConfigError::Invalid(
                "policy.multiplier_floor is above policy.multiplier_cap".to_string(),
            ));
        }
        if self.policy.profit_window == 0 {
            return Err(ConfigError::Invalid("policy.profit_window must be > 0".to_string()));
        }
        let ladder = &self.policy.take_profit;
        if ladder.iter().any(|&(multiple, fraction)| multiple <= 1.0 || !(fraction > 0.0 && fraction <= 1.0)) {
            return Err(ConfigError::Invalid(
                "policy.take_profit levels need a multiple above 1 and a fraction in (0, 1]".to_string(),
            ));
        }
        if ladder.iter().tuple_windows().any(|(a, b)| b.0 <= a.0) {
            return Err(ConfigError::Invalid(
                "policy.take_profit multiples must be strictly ascending".to_string(),
            ));
        }
        parse_pubkeys("nonce.accounts", &self.nonce.accounts)?;
        parse_pubkeys("relay.bundle_tip_accounts", &self.relay.bundle_tip_accounts)?;
        parse_pubkeys("relay.grpc_tip_accounts", &self.relay.grpc_tip_accounts)?;
        parse_pubkeys("relay.http_tip_accounts", &self.relay.http_tip_accounts)?;
        if let Some(authority) = &self.nonce.authority {
            parse_pubkeys("nonce.authority", std::slice::from_ref(authority))?;
        }
        Ok(())
    }
}

impl RelayConfig {
    pub fn race_timeout(&self) -> Duration {
        Duration::from_millis(self.race_timeout_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

pub fn parse_pubkeys(field: &'static str, values: &[String]) -> Result<Vec<Pubkey>, ConfigError> {
    values
        .iter()
        .map(|v| {
            Pubkey::from_str(v.trim()).map_err(|_| ConfigError::InvalidAddress {
                field,
                value: v.clone(),
            })
        })
        .collect()
}
