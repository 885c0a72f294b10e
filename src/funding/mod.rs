//! Balance movements: deposit crediting and withdrawals

pub mod chain_adapter;
pub mod deposit;
pub mod error;
pub mod ledger;
pub mod withdraw;

#[cfg(test)]
pub mod mock;

pub use chain_adapter::{ChainError, HotWallet, RpcHotWallet};
pub use deposit::{CreditRequest, DepositError, DepositService};
pub use error::LedgerError;
pub use ledger::{CreditOutcome, DepositCredit, Ledger, MetadataStore, PgLedger, Reservation};
pub use withdraw::{WithdrawError, WithdrawPolicy, WithdrawReceipt, WithdrawService};
