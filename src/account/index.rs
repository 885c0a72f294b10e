//! Deposit address to owner lookup

use async_trait::async_trait;
use sqlx::PgPool;

use super::validation::EvmAddress;
use crate::funding::error::LedgerError;

/// Maps a deposit address to the user that owns it
#[async_trait]
pub trait AddressIndex: Send + Sync {
    /// Exact lookup of an already normalized address
    async fn owner_of(&self, address: &EvmAddress) -> Result<Option<i64>, LedgerError>;

    /// Normalize `raw` and resolve its owner
    ///
    /// Malformed input (wrong length, missing prefix, non-hex) is "no owner";
    /// the store is not consulted.
    async fn find_owner(&self, raw: &str) -> Result<Option<i64>, LedgerError> {
        match EvmAddress::new(raw) {
            Ok(address) => self.owner_of(&address).await,
            Err(e) => {
                tracing::debug!("Ignoring malformed address {:?}: {}", raw, e);
                Ok(None)
            }
        }
    }
}

/// Address index backed by the `deposit_addresses` table
#[derive(Clone)]
pub struct PgAddressIndex {
    pool: PgPool,
}

impl PgAddressIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AddressIndex for PgAddressIndex {
    async fn owner_of(&self, address: &EvmAddress) -> Result<Option<i64>, LedgerError> {
        // Stored lower-case; compare as-is so the unique index is used
        let owner: Option<i64> =
            sqlx::query_scalar("SELECT user_id FROM deposit_addresses WHERE wallet_address = $1")
                .bind(address.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingIndex {
        owners: HashMap<EvmAddress, i64>,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl AddressIndex for CountingIndex {
        async fn owner_of(&self, address: &EvmAddress) -> Result<Option<i64>, LedgerError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.owners.get(address).copied())
        }
    }

    fn index() -> CountingIndex {
        let mut owners = HashMap::new();
        owners.insert(
            EvmAddress::new("0x7e5f4552091a69125d5dfcb7b8c2659029395bdf").unwrap(),
            42,
        );
        CountingIndex {
            owners,
            lookups: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_find_owner_is_case_insensitive() {
        let index = index();
        let owner = index
            .find_owner("0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf")
            .await
            .unwrap();
        assert_eq!(owner, Some(42));

        let owner = index
            .find_owner("  0x7e5f4552091a69125d5dfcb7b8c2659029395bdf\n")
            .await
            .unwrap();
        assert_eq!(owner, Some(42));
    }

    #[tokio::test]
    async fn test_find_owner_malformed_skips_lookup() {
        let index = index();
        for raw in [
            "",
            "0x1234",
            "7e5f4552091a69125d5dfcb7b8c2659029395bdf00",
            "0xZZ5f4552091a69125d5dfcb7b8c2659029395bdf",
        ] {
            assert_eq!(index.find_owner(raw).await.unwrap(), None);
        }
        assert_eq!(index.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_find_owner_unknown_address() {
        let index = index();
        let owner = index
            .find_owner("0x0000000000000000000000000000000000000001")
            .await
            .unwrap();
        assert_eq!(owner, None);
        assert_eq!(index.lookups.load(Ordering::SeqCst), 1);
    }
}
