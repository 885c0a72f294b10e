//! Deterministic deposit addresses
//!
//! Every user id maps 1:1 onto a non-hardened child of the master extended
//! public key. The master key is expected to sit at `m/44'/60'/0'/0`, so the
//! full path of a deposit address is `m/44'/60'/0'/0/{user_id}`.

use std::str::FromStr;

use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::secp256k1::{PublicKey, Secp256k1, VerifyOnly};
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::account::validation::{EvmAddress, ValidationError, validate_user_id};

/// Path of the account-level node the master xpub is exported from
pub const BASE_PATH: &str = "m/44'/60'/0'/0";

#[derive(Debug, Error)]
pub enum DeriveError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    #[error("Invalid extended public key: {0}")]
    InvalidXpub(String),

    #[error("Derivation failed: {0}")]
    Derivation(String),
}

/// Pure address deriver bound to one master xpub
pub struct AddressDeriver {
    master: Xpub,
    secp: Secp256k1<VerifyOnly>,
}

impl AddressDeriver {
    /// Parse the master xpub (base58check, `xpub`/`tpub` version bytes)
    pub fn new(master_xpub: &str) -> Result<Self, DeriveError> {
        let master = Xpub::from_str(master_xpub.trim())
            .map_err(|e| DeriveError::InvalidXpub(e.to_string()))?;

        Ok(Self {
            master,
            secp: Secp256k1::verification_only(),
        })
    }

    /// EIP-55 checksummed deposit address for `user_id`
    pub fn derive_address(&self, user_id: i64) -> Result<String, DeriveError> {
        let index = validate_user_id(user_id)?;
        let child = ChildNumber::from_normal_idx(index)
            .map_err(|e| DeriveError::Derivation(e.to_string()))?;

        let derived = self
            .master
            .derive_pub(&self.secp, &[child])
            .map_err(|e| DeriveError::Derivation(e.to_string()))?;

        Ok(address_from_public_key(&derived.public_key))
    }

    /// Same as [`derive_address`](Self::derive_address), normalized for storage
    pub fn derive_normalized(&self, user_id: i64) -> Result<EvmAddress, DeriveError> {
        let address = self.derive_address(user_id)?;
        Ok(EvmAddress::new(&address)?)
    }
}

/// Canonical derivation path of a user's deposit address
pub fn derive_path(user_id: i64) -> Result<String, DeriveError> {
    let index = validate_user_id(user_id)?;
    Ok(format!("{}/{}", BASE_PATH, index))
}

/// Keccak-256 digest
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// Account address of a secp256k1 public key, EIP-55 checksummed
pub fn address_from_public_key(key: &PublicKey) -> String {
    let uncompressed = key.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    checksum(&hex::encode(&hash[12..]))
}

/// EIP-55 mixed-case form of a normalized address
pub fn to_checksum_address(address: &EvmAddress) -> String {
    checksum(address.as_str().trim_start_matches("0x"))
}

/// `lower_hex` is the 40 lower-case hex digits of an address
fn checksum(lower_hex: &str) -> String {
    let hash = keccak256(lower_hex.as_bytes());
    let nibbles = hash.iter().flat_map(|b| [b >> 4, b & 0x0f]);

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (c, nibble) in lower_hex.chars().zip(nibbles) {
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}
