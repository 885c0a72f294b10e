use async_trait::async_trait;
use num_bigint::BigUint;

use super::error::ScannerError;
use crate::account::validation::EvmAddress;
use crate::money;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Used when a token contract does not answer `decimals()`
pub const DEFAULT_TOKEN_DECIMALS: u32 = 18;

/// Read-only view of an EVM chain
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Height of the most recent block known to the node
    async fn get_head_height(&self) -> Result<u64, ScannerError>;

    /// Block with full transaction objects; `None` if the node has no such block
    async fn get_block(&self, height: u64) -> Result<Option<ChainBlock>, ScannerError>;

    /// ERC-20 Transfer logs emitted in `[from, to]`
    async fn get_transfer_logs(&self, from: u64, to: u64)
    -> Result<Vec<TransferLog>, ScannerError>;

    /// `decimals()` of a token contract
    async fn get_token_decimals(&self, token: &EvmAddress) -> Result<u32, ScannerError>;
}

#[derive(Debug, Clone)]
pub struct ChainBlock {
    pub number: u64,
    pub hash: String,
    pub transactions: Vec<ChainTransaction>,
}

#[derive(Debug, Clone)]
pub struct ChainTransaction {
    pub hash: String,
    /// `None` for contract creation
    pub to: Option<String>,
    pub value: BigUint,
}

/// Raw event log as returned by the node
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u64,
}

/// Decoded ERC-20 transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    pub token: EvmAddress,
    pub to: EvmAddress,
    pub raw_amount: BigUint,
    pub tx_hash: String,
}

impl TransferLog {
    /// Decode as `Transfer(address indexed, address indexed, uint256)`
    ///
    /// Logs with fewer than three topics (ERC-721 style or anonymous) or
    /// without data are not ERC-20 transfers and yield `None`.
    pub fn decode(&self) -> Option<TokenTransfer> {
        if self.topics.len() < 3 || !self.topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC) {
            return None;
        }
        let data = self.data.trim();
        if data.is_empty() || data == "0x" {
            return None;
        }

        Some(TokenTransfer {
            token: EvmAddress::new(&self.address).ok()?,
            to: EvmAddress::from_topic(&self.topics[2]).ok()?,
            raw_amount: money::parse_quantity(data).ok()?,
            tx_hash: self.tx_hash.clone(),
        })
    }
}

/// Where a detected deposit came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositSource {
    Native,
    Token(EvmAddress),
}

/// A transfer into a watched address, not yet matched to a user
#[derive(Debug, Clone)]
pub struct DetectedDeposit {
    pub tx_hash: String,
    pub to_address: String,
    pub raw_amount: BigUint,
    pub source: DepositSource,
}

impl DetectedDeposit {
    /// Value transfers of a block; zero-value and contract-creation
    /// transactions are left out
    pub fn native_from_block(block: &ChainBlock) -> Vec<DetectedDeposit> {
        block
            .transactions
            .iter()
            .filter(|tx| tx.value.bits() > 0)
            .filter_map(|tx| {
                let to = tx.to.as_deref().filter(|to| !to.is_empty())?;
                Some(DetectedDeposit {
                    tx_hash: tx.hash.clone(),
                    to_address: to.to_string(),
                    raw_amount: tx.value.clone(),
                    source: DepositSource::Native,
                })
            })
            .collect()
    }

    pub fn from_token_transfer(transfer: TokenTransfer) -> DetectedDeposit {
        DetectedDeposit {
            tx_hash: transfer.tx_hash,
            to_address: transfer.to.into_string(),
            raw_amount: transfer.raw_amount,
            source: DepositSource::Token(transfer.token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::keccak256;

    const TOKEN: &str = "0x55d398326f99059fF775485246999027B3197955";
    const TO_TOPIC: &str = "0x0000000000000000000000007e5f4552091a69125d5dfcb7b8c2659029395bdf";
    const FROM_TOPIC: &str = "0x000000000000000000000000d8da6bf26964af9d7eed9e03e53415d37aa96045";

    fn log(topics: Vec<&str>, data: &str) -> TransferLog {
        TransferLog {
            address: TOKEN.to_string(),
            topics: topics.into_iter().map(String::from).collect(),
            data: data.to_string(),
            tx_hash: "0xfeed".to_string(),
            block_number: 997,
            log_index: 0,
        }
    }

    #[test]
    fn test_transfer_topic_matches_event_signature() {
        let digest = keccak256(b"Transfer(address,address,uint256)");
        assert_eq!(TRANSFER_TOPIC, format!("0x{}", hex::encode(digest)));
    }

    #[test]
    fn test_decode_erc20_transfer() {
        let log = log(
            vec![TRANSFER_TOPIC, FROM_TOPIC, TO_TOPIC],
            "0x0000000000000000000000000000000000000000000000000de0b6b3a7640000",
        );

        let transfer = log.decode().unwrap();
        assert_eq!(transfer.token.as_str(), TOKEN.to_lowercase());
        assert_eq!(transfer.to.as_str(), "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf");
        assert_eq!(transfer.raw_amount, BigUint::from(1_000_000_000_000_000_000u64));
    }

    #[test]
    fn test_decode_rejects_non_erc20_shapes() {
        // ERC-721 moves the token id into a fourth topic and has no data
        let nft = log(vec![TRANSFER_TOPIC, FROM_TOPIC, TO_TOPIC, TO_TOPIC], "0x");
        assert!(nft.decode().is_none());

        let short = log(vec![TRANSFER_TOPIC, FROM_TOPIC], "0x01");
        assert!(short.decode().is_none());

        let empty = log(vec![TRANSFER_TOPIC, FROM_TOPIC, TO_TOPIC], "");
        assert!(empty.decode().is_none());

        let other_event = log(vec![FROM_TOPIC, FROM_TOPIC, TO_TOPIC], "0x01");
        assert!(other_event.decode().is_none());
    }

    #[test]
    fn test_native_deposits_skip_zero_value_and_creation() {
        let block = ChainBlock {
            number: 1,
            hash: "0x01".to_string(),
            transactions: vec![
                ChainTransaction {
                    hash: "0xa".to_string(),
                    to: Some("0x7e5f4552091a69125d5dfcb7b8c2659029395bdf".to_string()),
                    value: BigUint::from(5u32),
                },
                ChainTransaction {
                    hash: "0xb".to_string(),
                    to: Some("0x7e5f4552091a69125d5dfcb7b8c2659029395bdf".to_string()),
                    value: BigUint::from(0u32),
                },
                ChainTransaction {
                    hash: "0xc".to_string(),
                    to: None,
                    value: BigUint::from(9u32),
                },
            ],
        };

        let deposits = DetectedDeposit::native_from_block(&block);
        assert_eq!(deposits.len(), 1);
        assert_eq!(deposits[0].tx_hash, "0xa");
        assert_eq!(deposits[0].source, DepositSource::Native);
    }
}
