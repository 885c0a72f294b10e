use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::account::validation::EvmAddress;
use crate::config::ConfigError;

/// Scanning settings for the deposit sentinel
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SentinelConfig {
    /// JSON-RPC endpoint of the chain node
    pub rpc_url: String,
    /// Minimum confirmation depth before a block is eligible (head counts as 1)
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_blocks_per_batch")]
    pub max_blocks_per_batch: u64,
    /// Pause between batches (RPC rate limiting)
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Bootstrap floor for the cursor
    #[serde(default)]
    pub min_start_height: u64,
    /// Currency code recorded for native-coin deposits
    #[serde(default = "default_native_currency")]
    pub native_currency: String,
    /// Attempts per block/log fetch beyond the first
    #[serde(default = "default_block_fetch_retries")]
    pub block_fetch_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Treat a block that cannot be fetched as empty and advance past it
    #[serde(default = "default_skip_missing_blocks")]
    pub skip_missing_blocks: bool,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    /// Token contracts eligible for crediting; empty accepts every token
    #[serde(default)]
    pub accepted_tokens: Vec<String>,
}

fn default_confirmations() -> u64 {
    3
}

fn default_poll_interval_ms() -> u64 {
    15_000
}

fn default_max_blocks_per_batch() -> u64 {
    5
}

fn default_batch_delay_ms() -> u64 {
    1_000
}

fn default_native_currency() -> String {
    "ETH".to_string()
}

fn default_block_fetch_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_skip_missing_blocks() -> bool {
    true
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            confirmations: default_confirmations(),
            poll_interval_ms: default_poll_interval_ms(),
            max_blocks_per_batch: default_max_blocks_per_batch(),
            batch_delay_ms: default_batch_delay_ms(),
            min_start_height: 0,
            native_currency: default_native_currency(),
            block_fetch_retries: default_block_fetch_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            skip_missing_blocks: default_skip_missing_blocks(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            accepted_tokens: Vec::new(),
        }
    }
}

impl SentinelConfig {
    /// Highest block eligible for crediting given the chain head
    ///
    /// `head - (confirmations - 1)`, saturating at zero.
    pub fn target_height(&self, head: u64) -> u64 {
        head.saturating_sub(self.confirmations.saturating_sub(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Parsed token allow-list
    pub fn accepted_token_set(&self) -> Result<HashSet<EvmAddress>, ConfigError> {
        self.accepted_tokens
            .iter()
            .map(|t| {
                EvmAddress::new(t)
                    .map_err(|e| ConfigError::Invalid(format!("accepted_tokens: {}", e)))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::Missing("sentinel.rpc_url"));
        }
        if self.confirmations == 0 {
            return Err(ConfigError::Invalid(
                "sentinel.confirmations must be at least 1".to_string(),
            ));
        }
        if self.max_blocks_per_batch == 0 {
            return Err(ConfigError::Invalid(
                "sentinel.max_blocks_per_batch must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sentinel.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.native_currency.trim().is_empty() {
            return Err(ConfigError::Missing("sentinel.native_currency"));
        }
        self.accepted_token_set()?;
        Ok(())
    }
}
