use thiserror::Error;

use crate::config::ConfigError;
use crate::funding::error::LedgerError;

#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Block not found at height {0}")]
    BlockNotFound(u64),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("Scanner error: {0}")]
    Scanner(#[from] ScannerError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
