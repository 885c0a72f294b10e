//! EVM JSON-RPC access
//!
//! Works against any node speaking the standard `eth_*` namespace
//! (Geth, Anvil, BSC, hosted providers).

use super::error::ScannerError;
use super::scanner::{ChainBlock, ChainReader, ChainTransaction, TRANSFER_TOPIC, TransferLog};
use crate::account::validation::EvmAddress;
use crate::money::{parse_quantity, to_quantity};
use async_trait::async_trait;
use num_bigint::BigUint;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Selector of `decimals()`
const DECIMALS_SELECTOR: &str = "0x313ce567";

/// JSON-RPC request structure
#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Minimal JSON-RPC 2.0 client over HTTP
pub struct JsonRpcClient {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ScannerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ScannerError::RpcConnection(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            url: url.to_string(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call a method whose result may legitimately be `null`
    pub async fn call_optional<P, R>(
        &self,
        method: &'static str,
        params: P,
    ) -> Result<Option<R>, ScannerError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ScannerError::RpcConnection(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScannerError::RpcConnection(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| ScannerError::Parse(format!("Failed to parse {} response: {}", method, e)))?;

        if let Some(error) = rpc_response.error {
            return Err(ScannerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(rpc_response.result)
    }

    /// Call a method that always returns a result
    pub async fn call<P, R>(&self, method: &'static str, params: P) -> Result<R, ScannerError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        self.call_optional(method, params)
            .await?
            .ok_or_else(|| ScannerError::Parse(format!("No result in {} response", method)))
    }
}

/// Block as returned by `eth_getBlockByNumber(_, true)`
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    number: String,
    hash: Option<String>,
    #[serde(default)]
    transactions: Vec<RpcTransaction>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    hash: String,
    to: Option<String>,
    value: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    transaction_hash: Option<String>,
    block_number: Option<String>,
    log_index: Option<String>,
    #[serde(default)]
    removed: bool,
}

fn parse_height(value: &str) -> Result<u64, ScannerError> {
    let quantity = parse_quantity(value).map_err(|e| ScannerError::Parse(e.to_string()))?;
    u64::try_from(&quantity).map_err(|_| ScannerError::Parse(format!("height out of range: {}", value)))
}

impl TryFrom<RpcBlock> for ChainBlock {
    type Error = ScannerError;

    fn try_from(block: RpcBlock) -> Result<Self, Self::Error> {
        let transactions = block
            .transactions
            .into_iter()
            .map(|tx| {
                let value = parse_quantity(&tx.value).map_err(|e| {
                    ScannerError::Parse(format!("tx {} value {}: {}", tx.hash, tx.value, e))
                })?;
                Ok(ChainTransaction {
                    hash: tx.hash,
                    to: tx.to,
                    value,
                })
            })
            .collect::<Result<Vec<_>, ScannerError>>()?;

        Ok(ChainBlock {
            number: parse_height(&block.number)?,
            hash: block.hash.unwrap_or_default(),
            transactions,
        })
    }
}

impl RpcLog {
    /// `None` for logs dropped by a re-org or still pending
    fn into_transfer_log(self) -> Result<Option<TransferLog>, ScannerError> {
        let (Some(tx_hash), Some(block_number)) = (self.transaction_hash, self.block_number) else {
            return Ok(None);
        };
        if self.removed {
            return Ok(None);
        }

        Ok(Some(TransferLog {
            address: self.address,
            topics: self.topics,
            data: self.data,
            tx_hash,
            block_number: parse_height(&block_number)?,
            log_index: match self.log_index {
                Some(index) => parse_height(&index)?,
                None => 0,
            },
        }))
    }
}

/// Chain reader backed by a JSON-RPC node
pub struct EthRpcClient {
    rpc: JsonRpcClient,
}

impl EthRpcClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ScannerError> {
        info!("Connecting chain reader to {}", url);
        Ok(Self {
            rpc: JsonRpcClient::new(url, timeout)?,
        })
    }

    pub fn rpc(&self) -> &JsonRpcClient {
        &self.rpc
    }
}

#[async_trait]
impl ChainReader for EthRpcClient {
    async fn get_head_height(&self) -> Result<u64, ScannerError> {
        let head: String = self.rpc.call("eth_blockNumber", json!([])).await?;
        parse_height(&head)
    }

    async fn get_block(&self, height: u64) -> Result<Option<ChainBlock>, ScannerError> {
        let block: Option<RpcBlock> = self
            .rpc
            .call_optional(
                "eth_getBlockByNumber",
                json!([to_quantity(&BigUint::from(height)), true]),
            )
            .await?;

        match block {
            Some(block) => {
                let block = ChainBlock::try_from(block)?;
                debug!(
                    "Fetched block {} with {} transactions",
                    block.number,
                    block.transactions.len()
                );
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    async fn get_transfer_logs(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<TransferLog>, ScannerError> {
        let filter = json!([{
            "fromBlock": to_quantity(&BigUint::from(from)),
            "toBlock": to_quantity(&BigUint::from(to)),
            "topics": [TRANSFER_TOPIC],
        }]);
        let logs: Vec<RpcLog> = self.rpc.call("eth_getLogs", filter).await?;

        let mut out = Vec::with_capacity(logs.len());
        for log in logs {
            if let Some(log) = log.into_transfer_log()? {
                out.push(log);
            }
        }
        Ok(out)
    }

    async fn get_token_decimals(&self, token: &EvmAddress) -> Result<u32, ScannerError> {
        let result: String = self
            .rpc
            .call(
                "eth_call",
                json!([{ "to": token.as_str(), "data": DECIMALS_SELECTOR }, "latest"]),
            )
            .await?;

        let value = parse_quantity(&result)
            .map_err(|e| ScannerError::Parse(format!("decimals() of {}: {}", token, e)))?;
        u8::try_from(&value)
            .map(u32::from)
            .map_err(|_| ScannerError::Parse(format!("decimals() of {} out of range", token)))
    }
}
