//! HD wallet helpers: deposit address derivation and Keccak hashing

pub mod derivation;

pub use derivation::{AddressDeriver, DeriveError, derive_path, keccak256, to_checksum_address};
