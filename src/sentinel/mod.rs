//! Sentinel Service Module
//!
//! Watches an EVM chain for transfers into user deposit addresses and
//! credits them once they are `confirmations` deep:
//! - Native-coin value transfers
//! - ERC-20 `Transfer` events
//! - Durable cursor with crash-safe replay
//! - Single-flight periodic scanning

pub mod config;
pub mod cursor;
pub mod error;
pub mod eth;
pub mod scanner;
pub mod worker;

#[cfg(test)]
pub mod mock;

pub use config::SentinelConfig;
pub use cursor::CursorStore;
pub use error::{ScannerError, SentinelError};
pub use eth::{EthRpcClient, JsonRpcClient};
pub use scanner::{
    ChainBlock, ChainReader, ChainTransaction, DetectedDeposit, TRANSFER_TOPIC, TokenTransfer,
    TransferLog,
};
pub use worker::{ScanReport, ScanState, SentinelWorker};
