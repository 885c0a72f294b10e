//! Data models for user accounts and the transaction history

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// User account with its single ledger balance
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub balance: Decimal,
    pub derivation_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of account provisioning
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionedUser {
    pub id: i64,
    pub username: String,
    /// EIP-55 checksummed form, for display
    pub deposit_address: String,
    pub derivation_path: String,
}

/// Transaction direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Deposit,
    Withdrawal,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Deposit => "deposit",
            TxKind::Withdrawal => "withdrawal",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TxKind::Deposit),
            "withdrawal" => Ok(TxKind::Withdrawal),
            _ => Err(format!("Invalid transaction type: {}", s)),
        }
    }
}

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TxStatus::Pending),
            "confirmed" => Ok(TxStatus::Confirmed),
            "failed" => Ok(TxStatus::Failed),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}

/// Row of the transaction history
///
/// `amount` is always positive; the sign follows from `kind`.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub user_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub tx_hash: Option<String>,
    pub kind: TxKind,
    pub status: TxStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Contribution of this record to the user's balance once settled
    pub fn signed_amount(&self) -> Decimal {
        match self.kind {
            TxKind::Deposit => self.amount,
            TxKind::Withdrawal => -self.amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_status_roundtrip_strings() {
        for kind in [TxKind::Deposit, TxKind::Withdrawal] {
            assert_eq!(TxKind::from_str(kind.as_str()).unwrap(), kind);
        }
        for status in [TxStatus::Pending, TxStatus::Confirmed, TxStatus::Failed] {
            assert_eq!(TxStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(TxKind::from_str("wager").is_err());
        assert!(TxStatus::from_str("completed").is_err());
    }

    #[test]
    fn test_signed_amount() {
        let now = Utc::now();
        let mut record = TransactionRecord {
            id: 1,
            user_id: 7,
            amount: Decimal::new(15, 1),
            currency: "ETH".to_string(),
            tx_hash: Some("0xabc".to_string()),
            kind: TxKind::Deposit,
            status: TxStatus::Confirmed,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(record.signed_amount(), Decimal::new(15, 1));

        record.kind = TxKind::Withdrawal;
        assert_eq!(record.signed_amount(), Decimal::new(-15, 1));
    }
}
