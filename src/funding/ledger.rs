//! Balance ledger
//!
//! Every balance mutation takes the user's row lock first and writes the
//! history row in the same transaction as the balance change.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Row};

use super::error::LedgerError;
use crate::account::validation::EvmAddress;

/// One confirmed on-chain transfer, already converted to ledger units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositCredit {
    pub user_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub tx_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CreditOutcome {
    /// Balance increased; value after the credit
    Credited { balance: Decimal },
    /// (tx_hash, currency) was already recorded; nothing changed
    Duplicate,
    /// Nothing to credit; the ledger was not touched
    ZeroAmount,
}

impl CreditOutcome {
    pub fn is_credited(&self) -> bool {
        matches!(self, CreditOutcome::Credited { .. })
    }
}

/// Funds taken out of a balance for a pending withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub record_id: i64,
    pub balance: Decimal,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Record the deposit and raise the balance, at most once per
    /// (tx_hash, currency)
    async fn credit_deposit(&self, credit: &DepositCredit) -> Result<CreditOutcome, LedgerError>;

    /// Debit `amount` and open a pending withdrawal record
    async fn reserve_withdrawal(
        &self,
        user_id: i64,
        amount: Decimal,
        currency: &str,
        to: &EvmAddress,
    ) -> Result<Reservation, LedgerError>;

    /// Store the broadcast hash on a pending withdrawal
    async fn attach_tx_hash(&self, record_id: i64, tx_hash: &str) -> Result<(), LedgerError>;

    /// Close a pending withdrawal; a failed one is refunded atomically
    async fn settle_withdrawal(&self, record_id: i64, confirmed: bool) -> Result<(), LedgerError>;

    async fn balance(&self, user_id: i64) -> Result<Decimal, LedgerError>;
}

/// Small key/value table for process state
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_meta(&self, key: &str) -> Result<Option<String>, LedgerError>;

    async fn set_meta(&self, key: &str, value: &str) -> Result<(), LedgerError>;
}

/// PostgreSQL ledger
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn credit_deposit(&self, credit: &DepositCredit) -> Result<CreditOutcome, LedgerError> {
        if credit.amount <= Decimal::ZERO {
            return Ok(CreditOutcome::ZeroAmount);
        }

        let mut tx = self.pool.begin().await?;

        // Serializes all balance writers of this user
        let locked = sqlx::query("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
            .bind(credit.user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(LedgerError::UserNotFound(credit.user_id));
        }

        let inserted = sqlx::query(
            r#"INSERT INTO transactions (user_id, amount, currency, tx_hash, type, status)
               VALUES ($1, $2, $3, $4, 'deposit', 'confirmed')
               ON CONFLICT (tx_hash, currency) WHERE type = 'deposit' DO NOTHING"#,
        )
        .bind(credit.user_id)
        .bind(credit.amount)
        .bind(&credit.currency)
        .bind(&credit.tx_hash)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CreditOutcome::Duplicate);
        }

        let balance: Decimal = sqlx::query_scalar(
            "UPDATE users SET balance = balance + $1, updated_at = NOW() WHERE id = $2 RETURNING balance",
        )
        .bind(credit.amount)
        .bind(credit.user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CreditOutcome::Credited { balance })
    }

    async fn reserve_withdrawal(
        &self,
        user_id: i64,
        amount: Decimal,
        currency: &str,
        to: &EvmAddress,
    ) -> Result<Reservation, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let available: Decimal =
            sqlx::query_scalar("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(LedgerError::UserNotFound(user_id))?;

        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                available,
                requested: amount,
            });
        }

        let balance: Decimal = sqlx::query_scalar(
            "UPDATE users SET balance = balance - $1, updated_at = NOW() WHERE id = $2 RETURNING balance",
        )
        .bind(amount)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let record_id: i64 = sqlx::query_scalar(
            r#"INSERT INTO transactions (user_id, amount, currency, type, status, to_address)
               VALUES ($1, $2, $3, 'withdrawal', 'pending', $4)
               RETURNING id"#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(currency)
        .bind(to.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Reservation { record_id, balance })
    }

    async fn attach_tx_hash(&self, record_id: i64, tx_hash: &str) -> Result<(), LedgerError> {
        let updated = sqlx::query(
            r#"UPDATE transactions SET tx_hash = $1, updated_at = NOW()
               WHERE id = $2 AND type = 'withdrawal' AND status = 'pending'"#,
        )
        .bind(tx_hash)
        .bind(record_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(LedgerError::RecordNotFound(record_id));
        }
        Ok(())
    }

    async fn settle_withdrawal(&self, record_id: i64, confirmed: bool) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"SELECT user_id, amount, status FROM transactions
               WHERE id = $1 AND type = 'withdrawal' FOR UPDATE"#,
        )
        .bind(record_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::RecordNotFound(record_id))?;

        let user_id: i64 = row.try_get("user_id")?;
        let amount: Decimal = row.try_get("amount")?;
        let status: String = row.try_get("status")?;
        if status != "pending" {
            return Err(LedgerError::InvalidState(format!(
                "withdrawal {} is already {}",
                record_id, status
            )));
        }

        let new_status = if confirmed { "confirmed" } else { "failed" };
        if !confirmed {
            sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;
            sqlx::query("UPDATE users SET balance = balance + $1, updated_at = NOW() WHERE id = $2")
                .bind(amount)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE transactions SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(new_status)
            .bind(record_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn balance(&self, user_id: i64) -> Result<Decimal, LedgerError> {
        sqlx::query_scalar("SELECT balance FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))
    }
}

#[async_trait]
impl MetadataStore for PgLedger {
    async fn get_meta(&self, key: &str) -> Result<Option<String>, LedgerError> {
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM metadata WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.flatten())
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<(), LedgerError> {
        sqlx::query(
            r#"INSERT INTO metadata (key, value) VALUES ($1, $2)
               ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()"#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
