//! Account management module
//!
//! Users, their deposit addresses and the transaction history.

pub mod index;
pub mod models;
pub mod repository;
pub mod validation;

pub use index::{AddressIndex, PgAddressIndex};
pub use models::{ProvisionedUser, TransactionRecord, TxKind, TxStatus, User};
pub use repository::{AccountError, TransactionRepository, UserRepository};
pub use validation::{EvmAddress, Username, ValidationError};
