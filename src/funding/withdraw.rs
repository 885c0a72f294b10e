use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{error, info, warn};

use super::chain_adapter::{ChainError, HotWallet};
use super::error::LedgerError;
use super::ledger::Ledger;
use crate::account::models::TxStatus;
use crate::account::validation::{EvmAddress, ValidationError};
use crate::money::{self, MoneyError, NATIVE_DECIMALS};

#[derive(Debug, Error)]
pub enum WithdrawError {
    #[error("Invalid destination address: {0}")]
    InvalidAddress(#[from] ValidationError),
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] MoneyError),
    #[error("Amount {amount} exceeds withdrawal limit {max}")]
    ExceedsLimit { amount: Decimal, max: Decimal },
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Broadcast rejected and refunded: {0}")]
    Broadcast(ChainError),
    #[error("Broadcast outcome unknown, withdrawal {record_id} left pending: {source}")]
    BroadcastUnknown { record_id: i64, source: ChainError },
}

/// Limits and receipt polling for the withdrawal path
#[derive(Debug, Clone)]
pub struct WithdrawPolicy {
    pub currency: String,
    pub max_withdraw: Option<Decimal>,
    pub receipt_poll: Duration,
    pub receipt_timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawReceipt {
    pub record_id: i64,
    pub tx_hash: String,
    /// `Pending` if no receipt arrived before the timeout
    pub status: TxStatus,
}

pub struct WithdrawService {
    ledger: Arc<dyn Ledger>,
    wallet: Arc<dyn HotWallet>,
    policy: WithdrawPolicy,
}

impl WithdrawService {
    pub fn new(ledger: Arc<dyn Ledger>, wallet: Arc<dyn HotWallet>, policy: WithdrawPolicy) -> Self {
        Self {
            ledger,
            wallet,
            policy,
        }
    }

    /// Pay `amount` of the native coin out of a user's balance
    ///
    /// 1. Lock the balance row, debit, open a pending record (one transaction)
    /// 2. Broadcast from the hot wallet; a rejected broadcast is refunded and
    ///    marked failed, a transport failure stays pending and debited
    /// 3. Wait for the receipt; a reverted transfer is refunded
    pub async fn withdraw(
        &self,
        user_id: i64,
        to: &str,
        amount: Decimal,
    ) -> Result<WithdrawReceipt, WithdrawError> {
        let to = EvmAddress::new(to)?;
        let amount_wei = money::to_base_units(amount, NATIVE_DECIMALS)?;
        if let Some(max) = self.policy.max_withdraw
            && amount > max
        {
            return Err(WithdrawError::ExceedsLimit { amount, max });
        }

        let reservation = self
            .ledger
            .reserve_withdrawal(user_id, amount, &self.policy.currency, &to)
            .await?;
        let record_id = reservation.record_id;
        info!(
            user_id,
            record_id,
            "Reserved {} {} for withdrawal to {}",
            amount,
            self.policy.currency,
            to
        );

        let tx_hash = match self.wallet.send_native(&to, &amount_wei).await {
            Ok(tx_hash) => tx_hash,
            Err(e @ ChainError::Rejected(_)) => {
                error!(user_id, record_id, "Broadcast rejected: {}. Refunding...", e);
                self.ledger.settle_withdrawal(record_id, false).await?;
                return Err(WithdrawError::Broadcast(e));
            }
            Err(e) => {
                // The node may have accepted the transaction; keep the debit
                error!(
                    user_id,
                    record_id,
                    "Broadcast outcome unknown: {}. Withdrawal left pending for manual reconciliation",
                    e
                );
                return Err(WithdrawError::BroadcastUnknown {
                    record_id,
                    source: e,
                });
            }
        };
        self.ledger.attach_tx_hash(record_id, &tx_hash).await?;

        let status = match self.wait_for_receipt(&tx_hash).await {
            Some(true) => {
                self.ledger.settle_withdrawal(record_id, true).await?;
                TxStatus::Confirmed
            }
            Some(false) => {
                warn!(record_id, tx_hash = %tx_hash, "Withdrawal reverted on chain, refunding");
                self.ledger.settle_withdrawal(record_id, false).await?;
                TxStatus::Failed
            }
            None => {
                warn!(
                    record_id,
                    tx_hash = %tx_hash,
                    "No receipt after {:?}; withdrawal left pending",
                    self.policy.receipt_timeout
                );
                TxStatus::Pending
            }
        };

        Ok(WithdrawReceipt {
            record_id,
            tx_hash,
            status,
        })
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Option<bool> {
        let deadline = Instant::now() + self.policy.receipt_timeout;
        loop {
            match self.wallet.receipt_status(tx_hash).await {
                Ok(Some(success)) => return Some(success),
                Ok(None) => {}
                Err(e) => warn!(tx_hash, "Receipt query failed: {}", e),
            }
            if Instant::now() + self.policy.receipt_poll > deadline {
                return None;
            }
            sleep(self.policy.receipt_poll).await;
        }
    }
}
