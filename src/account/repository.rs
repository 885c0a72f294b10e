//! Repository layer for database operations

use super::models::{ProvisionedUser, TransactionRecord, TxKind, TxStatus, User};
use super::validation::Username;
use crate::db::SafeRow;
use crate::wallet::{AddressDeriver, DeriveError, derive_path};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Address derivation failed: {0}")]
    Derive(#[from] DeriveError),

    #[error("Username already taken: {0}")]
    UsernameTaken(String),
}

/// User repository
pub struct UserRepository;

impl UserRepository {
    /// Create a user and bind its deposit address
    ///
    /// The address is derived from the freshly assigned id, so row insert,
    /// derivation and address insert share one transaction. A derivation
    /// failure leaves no orphan user behind.
    pub async fn provision(
        pool: &PgPool,
        deriver: &AddressDeriver,
        username: &Username,
    ) -> Result<ProvisionedUser, AccountError> {
        let mut tx = pool.begin().await?;

        let inserted = sqlx::query(
            r#"INSERT INTO users (username) VALUES ($1)
               ON CONFLICT (username) DO NOTHING
               RETURNING id"#,
        )
        .bind(username.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = inserted else {
            return Err(AccountError::UsernameTaken(username.as_str().to_string()));
        };
        let id: i64 = row.get("id");

        let deposit_address = deriver.derive_address(id)?;
        let stored = deriver.derive_normalized(id)?;
        let path = derive_path(id)?;

        sqlx::query("INSERT INTO deposit_addresses (user_id, wallet_address) VALUES ($1, $2)")
            .bind(id)
            .bind(stored.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE users SET derivation_path = $1, updated_at = NOW() WHERE id = $2")
            .bind(&path)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(user_id = id, address = %stored, "Provisioned user {}", username);

        Ok(ProvisionedUser {
            id,
            username: username.as_str().to_string(),
            deposit_address,
            derivation_path: path,
        })
    }

    /// Get user by ID
    pub async fn get_by_id(pool: &PgPool, user_id: i64) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query(
            r#"SELECT id, username, balance, derivation_path, created_at
               FROM users WHERE id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|r| User {
            id: r.get("id"),
            username: r.get("username"),
            balance: r.get("balance"),
            derivation_path: r.get("derivation_path"),
            created_at: r.get("created_at"),
        }))
    }

    /// Stored (lower-case) deposit address of a user
    pub async fn deposit_address(
        pool: &PgPool,
        user_id: i64,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT wallet_address FROM deposit_addresses WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }
}

/// Read side of the transaction history
pub struct TransactionRepository;

impl TransactionRepository {
    /// Most recent records of a user, newest first
    ///
    /// Rows that fail to decode are logged and left out.
    pub async fn history(
        pool: &PgPool,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"SELECT id, user_id, amount, currency, tx_hash, type, status, created_at, updated_at
               FROM transactions
               WHERE user_id = $1
               ORDER BY created_at DESC, id DESC
               LIMIT $2"#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|r| {
                let kind: String = r.try_get_log("type")?;
                let status: String = r.try_get_log("status")?;
                Some(TransactionRecord {
                    id: r.try_get_log("id")?,
                    user_id: r.try_get_log("user_id")?,
                    amount: r.try_get_log("amount")?,
                    currency: r.try_get_log("currency")?,
                    tx_hash: r.try_get_log("tx_hash")?,
                    kind: TxKind::from_str(&kind).ok()?,
                    status: TxStatus::from_str(&status).ok()?,
                    created_at: r.try_get_log("created_at")?,
                    updated_at: r.try_get_log("updated_at")?,
                })
            })
            .collect())
    }
}
