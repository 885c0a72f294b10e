//! Deposit Sentinel - custodial deposit detection for EVM chains
//!
//! Derives one deposit address per user from a master xpub, watches the
//! chain for confirmed transfers into those addresses and credits them
//! exactly once to a PostgreSQL balance ledger.
//!
//! # Modules
//!
//! - [`wallet`] - HD deposit address derivation
//! - [`account`] - Users, deposit addresses, transaction history
//! - [`funding`] - Balance ledger, deposit crediting, withdrawals
//! - [`sentinel`] - Chain reader, cursor and the scanning worker
//! - [`money`] - Chain unit <-> ledger amount conversion
//! - [`config`] / [`logging`] / [`db`] - Process plumbing

pub mod account;
pub mod config;
pub mod db;
pub mod funding;
pub mod logging;
pub mod money;
pub mod sentinel;
pub mod wallet;

// Convenient re-exports at crate root
pub use account::validation::EvmAddress;
pub use config::{AppConfig, ConfigError};
pub use funding::{CreditOutcome, Ledger, PgLedger};
pub use sentinel::{ChainReader, SentinelWorker};
pub use wallet::AddressDeriver;
