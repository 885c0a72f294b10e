use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::account::validation::EvmAddress;
use crate::sentinel::config::SentinelConfig;
use crate::wallet::AddressDeriver;

/// Startup configuration errors; the process does not start on any of these
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL for the ledger
    #[serde(default)]
    pub postgres_url: String,
    pub sentinel: SentinelConfig,
    pub wallet: WalletConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WalletConfig {
    /// Extended public key of `m/44'/60'/0'/0`
    #[serde(default)]
    pub master_xpub: String,
    /// Node-managed account that funds withdrawals
    #[serde(default)]
    pub hot_wallet_address: Option<String>,
    /// Upper bound for a single withdrawal, in native units
    #[serde(default)]
    pub max_withdraw: Option<Decimal>,
    #[serde(default = "default_receipt_poll_ms")]
    pub receipt_poll_ms: u64,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
}

fn default_receipt_poll_ms() -> u64 {
    2_000
}

fn default_receipt_timeout_secs() -> u64 {
    120
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            master_xpub: String::new(),
            hot_wallet_address: None,
            max_withdraw: None,
            receipt_poll_ms: default_receipt_poll_ms(),
            receipt_timeout_secs: default_receipt_timeout_secs(),
        }
    }
}

impl WalletConfig {
    pub fn receipt_poll(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}

impl AppConfig {
    /// Load `config/{env}.yaml`, apply environment overrides and validate
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;

        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Secrets and endpoints may come from the environment instead of the file
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.postgres_url = url;
        }
        if let Some(url) = lookup("PROVIDER_URL") {
            self.sentinel.rpc_url = url;
        }
        if let Some(xpub) = lookup("MASTER_XPUB") {
            self.wallet.master_xpub = xpub;
        }
        if let Some(addr) = lookup("HOT_WALLET_ADDRESS") {
            self.wallet.hot_wallet_address = Some(addr);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.postgres_url.trim().is_empty() {
            return Err(ConfigError::Missing("postgres_url"));
        }

        self.sentinel.validate()?;

        if self.wallet.master_xpub.trim().is_empty() {
            return Err(ConfigError::Missing("wallet.master_xpub"));
        }
        AddressDeriver::new(&self.wallet.master_xpub)
            .map_err(|e| ConfigError::Invalid(format!("wallet.master_xpub: {}", e)))?;

        if let Some(addr) = &self.wallet.hot_wallet_address {
            EvmAddress::new(addr)
                .map_err(|e| ConfigError::Invalid(format!("wallet.hot_wallet_address: {}", e)))?;
        }

        if let Some(max) = self.wallet.max_withdraw
            && max <= Decimal::ZERO
        {
            return Err(ConfigError::Invalid(
                "wallet.max_withdraw must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
