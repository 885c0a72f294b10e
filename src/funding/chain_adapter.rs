use async_trait::async_trait;
use num_bigint::BigUint;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::account::validation::EvmAddress;
use crate::money::to_quantity;
use crate::sentinel::error::ScannerError;
use crate::sentinel::eth::JsonRpcClient;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Transaction rejected: {0}")]
    Rejected(String),
}

impl From<ScannerError> for ChainError {
    fn from(e: ScannerError) -> Self {
        match e {
            ScannerError::Rpc { code, message } => {
                ChainError::Rejected(format!("{} ({})", message, code))
            }
            other => ChainError::Network(other.to_string()),
        }
    }
}

/// Account that pays out withdrawals
#[async_trait]
pub trait HotWallet: Send + Sync {
    /// Broadcast a native-coin transfer, returning its transaction hash
    async fn send_native(&self, to: &EvmAddress, amount_wei: &BigUint)
    -> Result<String, ChainError>;

    /// `Some(true)` mined and succeeded, `Some(false)` mined and reverted,
    /// `None` not mined yet
    async fn receipt_status(&self, tx_hash: &str) -> Result<Option<bool>, ChainError>;
}

#[derive(Deserialize)]
struct RpcReceipt {
    status: Option<String>,
}

/// Hot wallet whose key is held by the node (`eth_sendTransaction`)
pub struct RpcHotWallet {
    rpc: JsonRpcClient,
    from: EvmAddress,
}

impl RpcHotWallet {
    pub fn new(url: &str, from: EvmAddress, timeout: Duration) -> Result<Self, ChainError> {
        Ok(Self {
            rpc: JsonRpcClient::new(url, timeout)?,
            from,
        })
    }

    pub fn address(&self) -> &EvmAddress {
        &self.from
    }
}

#[async_trait]
impl HotWallet for RpcHotWallet {
    async fn send_native(
        &self,
        to: &EvmAddress,
        amount_wei: &BigUint,
    ) -> Result<String, ChainError> {
        let tx_hash: String = self
            .rpc
            .call(
                "eth_sendTransaction",
                json!([{
                    "from": self.from.as_str(),
                    "to": to.as_str(),
                    "value": to_quantity(amount_wei),
                }]),
            )
            .await?;
        Ok(tx_hash)
    }

    async fn receipt_status(&self, tx_hash: &str) -> Result<Option<bool>, ChainError> {
        let receipt: Option<RpcReceipt> = self
            .rpc
            .call_optional("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        // Pre-Byzantium receipts carry no status; treat as success
        Ok(receipt.map(|r| r.status.as_deref() != Some("0x0")))
    }
}
