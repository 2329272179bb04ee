use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

/// Hard ceiling on addresses per `eth_subscribe("logs")` filter imposed by
/// the upstream nodes. A batch never holds more subscriptions than this.
pub const MAX_ADDRESSES_PER_SUBSCRIPTION: usize = 1000;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub subscriptions: SubscriptionSettings,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_http: Option<String>,
    pub rpc_ws: Option<String>,
}

// ============================================================
// Subscription Engine Settings
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct SubscriptionSettings {
    #[serde(default = "default_max_addresses")]
    pub max_addresses_per_batch: usize,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    /// Read `balanceOf` at the block of the triggering log instead of latest.
    #[serde(default)]
    pub pin_balance_reads: bool,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            max_addresses_per_batch: MAX_ADDRESSES_PER_SUBSCRIPTION,
            reconnect_base_delay_ms: 5000,
            max_reconnect_attempts: 10,
            rpc_timeout_ms: 10_000,
            pin_balance_reads: false,
            event_buffer: 256,
        }
    }
}

impl SubscriptionSettings {
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Linear backoff: the n-th consecutive attempt waits `n × base`.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_base_delay().saturating_mul(attempt)
    }
}

fn default_max_addresses() -> usize {
    MAX_ADDRESSES_PER_SUBSCRIPTION
}

fn default_reconnect_base_delay_ms() -> u64 {
    5000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

fn default_event_buffer() -> usize {
    256
}

// ============================================================
// API Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_api_host")]
    pub host: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_port() -> u16 {
    3000
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> eyre::Result<()> {
        if self.chains.is_empty() {
            return Err(eyre::eyre!("At least one chain must be configured"));
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                return Err(eyre::eyre!(
                    "Chain id {} is configured more than once",
                    chain.chain_id
                ));
            }
            for url in [&chain.rpc_http, &chain.rpc_ws].into_iter().flatten() {
                if url.trim().is_empty() {
                    return Err(eyre::eyre!("Chain '{}' has an empty RPC URL", chain.name));
                }
            }
        }

        let subs = &self.subscriptions;
        if subs.max_addresses_per_batch == 0
            || subs.max_addresses_per_batch > MAX_ADDRESSES_PER_SUBSCRIPTION
        {
            return Err(eyre::eyre!(
                "max_addresses_per_batch must be between 1 and {}, got {}",
                MAX_ADDRESSES_PER_SUBSCRIPTION,
                subs.max_addresses_per_batch
            ));
        }
        if subs.rpc_timeout_ms == 0 {
            return Err(eyre::eyre!("rpc_timeout_ms must be greater than zero"));
        }
        if subs.event_buffer == 0 {
            return Err(eyre::eyre!("event_buffer must be greater than zero"));
        }
        Ok(())
    }
}
