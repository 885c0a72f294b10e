//! In-memory ledger for unit tests
//!
//! One async mutex plays the role of the per-user row lock; it is held across
//! a yield point so unlocked read-modify-write bugs would show up.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::error::{DatabaseError, ErrorKind};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::error::LedgerError;
use super::ledger::{CreditOutcome, DepositCredit, Ledger, MetadataStore, Reservation};
use crate::account::index::AddressIndex;
use crate::account::models::{TxKind, TxStatus};
use crate::account::validation::EvmAddress;

/// Database error carrying only a SQLSTATE code
#[derive(Debug)]
struct SqlState(&'static str);

impl fmt::Display for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SQLSTATE {}", self.0)
    }
}

impl std::error::Error for SqlState {}

impl DatabaseError for SqlState {
    fn message(&self) -> &str {
        "simulated database error"
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self.0))
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// A `LedgerError::Database` with the given SQLSTATE, as Postgres would report it
pub fn sql_error(code: &'static str) -> LedgerError {
    LedgerError::Database(sqlx::Error::Database(Box::new(SqlState(code))))
}

#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub id: i64,
    pub user_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub tx_hash: Option<String>,
    pub kind: TxKind,
    pub status: TxStatus,
}

#[derive(Default)]
struct State {
    balances: HashMap<i64, Decimal>,
    owners: HashMap<EvmAddress, i64>,
    records: Vec<MemoryRecord>,
    deposit_keys: HashSet<(String, String)>,
    meta: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
    pub credit_calls: AtomicUsize,
    pub lookups: AtomicUsize,
    fail_meta_writes: AtomicBool,
    fail_lookups: AtomicBool,
    credit_failure: std::sync::Mutex<Option<&'static str>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user_id: i64, address: &str) {
        let mut state = self.state.lock().await;
        state.balances.insert(user_id, Decimal::ZERO);
        let address = EvmAddress::new(address).expect("test address");
        state.owners.insert(address, user_id);
    }

    pub async fn set_balance(&self, user_id: i64, balance: Decimal) {
        self.state.lock().await.balances.insert(user_id, balance);
    }

    pub async fn records(&self) -> Vec<MemoryRecord> {
        self.state.lock().await.records.clone()
    }

    pub async fn deposits(&self) -> Vec<MemoryRecord> {
        self.records()
            .await
            .into_iter()
            .filter(|r| r.kind == TxKind::Deposit)
            .collect()
    }

    pub fn fail_meta_writes(&self, fail: bool) {
        self.fail_meta_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Fail every credit with the given SQLSTATE (`None` to stop)
    pub fn fail_credits(&self, code: Option<&'static str>) {
        if let Ok(mut failure) = self.credit_failure.lock() {
            *failure = code;
        }
    }

    fn unavailable() -> LedgerError {
        LedgerError::Database(sqlx::Error::PoolTimedOut)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn credit_deposit(&self, credit: &DepositCredit) -> Result<CreditOutcome, LedgerError> {
        self.credit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = self.credit_failure.lock().ok().and_then(|f| *f) {
            return Err(sql_error(code));
        }
        if credit.amount <= Decimal::ZERO {
            return Ok(CreditOutcome::ZeroAmount);
        }

        let mut state = self.state.lock().await;
        let current = *state
            .balances
            .get(&credit.user_id)
            .ok_or(LedgerError::UserNotFound(credit.user_id))?;

        let key = (credit.tx_hash.clone(), credit.currency.clone());
        if state.deposit_keys.contains(&key) {
            return Ok(CreditOutcome::Duplicate);
        }
        tokio::task::yield_now().await;

        let balance = current + credit.amount;
        state.deposit_keys.insert(key);
        state.balances.insert(credit.user_id, balance);
        let id = state.records.len() as i64 + 1;
        state.records.push(MemoryRecord {
            id,
            user_id: credit.user_id,
            amount: credit.amount,
            currency: credit.currency.clone(),
            tx_hash: Some(credit.tx_hash.clone()),
            kind: TxKind::Deposit,
            status: TxStatus::Confirmed,
        });
        Ok(CreditOutcome::Credited { balance })
    }

    async fn reserve_withdrawal(
        &self,
        user_id: i64,
        amount: Decimal,
        currency: &str,
        _to: &EvmAddress,
    ) -> Result<Reservation, LedgerError> {
        let mut state = self.state.lock().await;
        let available = *state
            .balances
            .get(&user_id)
            .ok_or(LedgerError::UserNotFound(user_id))?;
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                available,
                requested: amount,
            });
        }
        tokio::task::yield_now().await;

        let balance = available - amount;
        state.balances.insert(user_id, balance);
        let record_id = state.records.len() as i64 + 1;
        state.records.push(MemoryRecord {
            id: record_id,
            user_id,
            amount,
            currency: currency.to_string(),
            tx_hash: None,
            kind: TxKind::Withdrawal,
            status: TxStatus::Pending,
        });
        Ok(Reservation { record_id, balance })
    }

    async fn attach_tx_hash(&self, record_id: i64, tx_hash: &str) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == record_id && r.kind == TxKind::Withdrawal)
            .filter(|r| r.status == TxStatus::Pending)
            .ok_or(LedgerError::RecordNotFound(record_id))?;
        record.tx_hash = Some(tx_hash.to_string());
        Ok(())
    }

    async fn settle_withdrawal(&self, record_id: i64, confirmed: bool) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == record_id && r.kind == TxKind::Withdrawal)
            .ok_or(LedgerError::RecordNotFound(record_id))?;
        if record.status != TxStatus::Pending {
            return Err(LedgerError::InvalidState(format!(
                "withdrawal {} is already {}",
                record_id, record.status
            )));
        }

        if confirmed {
            record.status = TxStatus::Confirmed;
        } else {
            record.status = TxStatus::Failed;
            let (user_id, amount) = (record.user_id, record.amount);
            *state.balances.entry(user_id).or_default() += amount;
        }
        Ok(())
    }

    async fn balance(&self, user_id: i64) -> Result<Decimal, LedgerError> {
        self.state
            .lock()
            .await
            .balances
            .get(&user_id)
            .copied()
            .ok_or(LedgerError::UserNotFound(user_id))
    }
}

#[async_trait]
impl MetadataStore for MemoryLedger {
    async fn get_meta(&self, key: &str) -> Result<Option<String>, LedgerError> {
        Ok(self.state.lock().await.meta.get(key).cloned())
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<(), LedgerError> {
        if self.fail_meta_writes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.state
            .lock()
            .await
            .meta
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[async_trait]
impl AddressIndex for MemoryLedger {
    async fn owner_of(&self, address: &EvmAddress) -> Result<Option<i64>, LedgerError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(self.state.lock().await.owners.get(address).copied())
    }
}
