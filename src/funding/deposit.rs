use num_bigint::BigUint;
use rust_decimal::RoundingStrategy;
use std::sync::Arc;
use thiserror::Error;

use super::error::LedgerError;
use super::ledger::{CreditOutcome, DepositCredit, Ledger};
use crate::money::{self, MoneyError};

#[derive(Debug, Error)]
pub enum DepositError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] MoneyError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// A matched transfer in chain units
#[derive(Debug, Clone)]
pub struct CreditRequest {
    pub user_id: i64,
    pub raw_amount: BigUint,
    pub decimals: u32,
    pub tx_hash: String,
    pub currency: String,
}

/// Converts detected transfers into ledger credits
#[derive(Clone)]
pub struct DepositService {
    ledger: Arc<dyn Ledger>,
}

impl DepositService {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Credit a transfer
    ///
    /// Idempotent on (tx_hash, currency). A zero transfer returns
    /// `ZeroAmount` without touching the ledger.
    pub async fn credit(&self, request: &CreditRequest) -> Result<CreditOutcome, DepositError> {
        if request.raw_amount.bits() == 0 {
            return Ok(CreditOutcome::ZeroAmount);
        }

        let amount = money::format_units(&request.raw_amount, request.decimals)?
            .round_dp_with_strategy(money::LEDGER_SCALE, RoundingStrategy::ToZero);
        // Dust below ledger precision
        if amount.is_zero() {
            return Ok(CreditOutcome::ZeroAmount);
        }

        let credit = DepositCredit {
            user_id: request.user_id,
            amount,
            currency: request.currency.clone(),
            tx_hash: request.tx_hash.to_lowercase(),
        };

        let outcome = self.ledger.credit_deposit(&credit).await?;
        match outcome {
            CreditOutcome::Credited { balance } => tracing::info!(
                user_id = credit.user_id,
                tx_hash = %credit.tx_hash,
                "Credited {} {} (balance {})",
                credit.amount,
                credit.currency,
                balance
            ),
            CreditOutcome::Duplicate => tracing::debug!(
                tx_hash = %credit.tx_hash,
                "Deposit already processed for {}",
                credit.currency
            ),
            CreditOutcome::ZeroAmount => {}
        }
        Ok(outcome)
    }
}
