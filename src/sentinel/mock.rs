//! Scriptable chain for unit tests
//!
//! Heights without an explicit block read as empty blocks.

use async_trait::async_trait;
use num_bigint::BigUint;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use super::error::ScannerError;
use super::scanner::{ChainBlock, ChainReader, ChainTransaction, TRANSFER_TOPIC, TransferLog};
use crate::account::validation::EvmAddress;

#[derive(Default)]
pub struct MockChain {
    head: AtomicU64,
    blocks: Mutex<HashMap<u64, ChainBlock>>,
    logs: Mutex<HashMap<u64, Vec<TransferLog>>>,
    decimals: Mutex<HashMap<EvmAddress, u32>>,
    missing: Mutex<HashSet<u64>>,
    failures: Mutex<HashMap<u64, u32>>,
    head_delay: Mutex<Option<Duration>>,
    /// Every height passed to `get_block`, in call order
    pub fetched: Mutex<Vec<u64>>,
    pub max_requested: AtomicU64,
    pub head_calls: AtomicUsize,
    pub decimals_calls: AtomicUsize,
}

impl MockChain {
    pub fn with_head(head: u64) -> Self {
        let chain = Self::default();
        chain.set_head(head);
        chain
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn add_native(&self, height: u64, tx_hash: &str, to: &str, wei: u128) {
        let mut blocks = self.blocks.lock().unwrap();
        let block = blocks.entry(height).or_insert_with(|| empty_block(height));
        block.transactions.push(ChainTransaction {
            hash: tx_hash.to_string(),
            to: Some(to.to_string()),
            value: BigUint::from(wei),
        });
    }

    pub fn add_token_transfer(&self, height: u64, tx_hash: &str, token: &str, to: &str, raw: u128) {
        let to_hex = to.trim_start_matches("0x").to_lowercase();
        let log = TransferLog {
            address: token.to_string(),
            topics: vec![
                TRANSFER_TOPIC.to_string(),
                format!("0x{:0>64}", "d8da6bf26964af9d7eed9e03e53415d37aa96045"),
                format!("0x{:0>64}", to_hex),
            ],
            data: format!("0x{:064x}", raw),
            tx_hash: tx_hash.to_string(),
            block_number: height,
            log_index: 0,
        };
        self.add_log(log);
    }

    pub fn add_log(&self, log: TransferLog) {
        self.logs
            .lock()
            .unwrap()
            .entry(log.block_number)
            .or_default()
            .push(log);
    }

    pub fn set_decimals(&self, token: &str, decimals: u32) {
        let token = EvmAddress::new(token).unwrap();
        self.decimals.lock().unwrap().insert(token, decimals);
    }

    /// `get_block(height)` answers `None`
    pub fn set_missing(&self, height: u64) {
        self.missing.lock().unwrap().insert(height);
    }

    /// The next `times` fetches of `height` fail with a connection error
    pub fn fail_block(&self, height: u64, times: u32) {
        self.failures.lock().unwrap().insert(height, times);
    }

    pub fn set_head_delay(&self, delay: Duration) {
        *self.head_delay.lock().unwrap() = Some(delay);
    }

    pub fn fetched(&self) -> Vec<u64> {
        self.fetched.lock().unwrap().clone()
    }

    fn record_request(&self, height: u64) {
        self.max_requested.fetch_max(height, Ordering::SeqCst);
    }

    fn take_failure(&self, height: u64) -> bool {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&height) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

fn empty_block(height: u64) -> ChainBlock {
    ChainBlock {
        number: height,
        hash: format!("0x{:064x}", height),
        transactions: Vec::new(),
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn get_head_height(&self) -> Result<u64, ScannerError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.head_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_block(&self, height: u64) -> Result<Option<ChainBlock>, ScannerError> {
        self.record_request(height);
        self.fetched.lock().unwrap().push(height);

        if self.take_failure(height) {
            return Err(ScannerError::RpcConnection("connection reset".to_string()));
        }
        if self.missing.lock().unwrap().contains(&height) {
            return Ok(None);
        }
        let block = self.blocks.lock().unwrap().get(&height).cloned();
        Ok(Some(block.unwrap_or_else(|| empty_block(height))))
    }

    async fn get_transfer_logs(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<TransferLog>, ScannerError> {
        self.record_request(to);
        let logs = self.logs.lock().unwrap();
        Ok((from..=to)
            .flat_map(|h| logs.get(&h).cloned().unwrap_or_default())
            .collect())
    }

    async fn get_token_decimals(&self, token: &EvmAddress) -> Result<u32, ScannerError> {
        self.decimals_calls.fetch_add(1, Ordering::SeqCst);
        self.decimals
            .lock()
            .unwrap()
            .get(token)
            .copied()
            .ok_or_else(|| ScannerError::Rpc {
                code: -32000,
                message: "execution reverted".to_string(),
            })
    }
}
