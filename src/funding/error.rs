use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by ledger storage operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("User not found: {0}")]
    UserNotFound(i64),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Transaction record not found: {0}")]
    RecordNotFound(i64),

    #[error("Invalid state transition: {0}")]
    InvalidState(String),

    #[error("Corrupt metadata value for {key}: {value}")]
    CorruptMetadata { key: String, value: String },
}

impl LedgerError {
    /// Row lock contention or constraint violation; safe to retry or skip
    pub fn is_conflict(&self) -> bool {
        match self {
            LedgerError::Database(sqlx::Error::Database(db)) => matches!(
                db.code().as_deref(),
                // unique_violation, serialization_failure, deadlock_detected, lock_not_available
                Some("23505") | Some("40001") | Some("40P01") | Some("55P03")
            ),
            _ => false,
        }
    }
}
