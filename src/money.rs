//! Money Conversion Module
//!
//! Conversion between on-chain integer quantities (`uint256` base units,
//! hex-encoded in JSON-RPC) and ledger `Decimal` amounts. All conversions
//! between the chain and the ledger MUST go through this module.
//!
//! ## Representation
//! - Chain side: `BigUint` base units (wei for the native coin, token
//!   base units for ERC-20), scale factor `10^decimals`
//! - Ledger side: `Decimal`, stored as `NUMERIC(36, 18)`
//!
//! ## Usage
//! ```rust
//! use deposit_sentinel::money::{format_units, parse_quantity};
//!
//! let raw = parse_quantity("0x14d1120d7b160000").unwrap(); // 1.5 ETH in wei
//! let amount = format_units(&raw, 18).unwrap();
//! assert_eq!(amount.to_string(), "1.500000000000000000");
//! ```

use num_bigint::BigUint;
use rust_decimal::prelude::*;
use thiserror::Error;

/// Decimal places used by the ledger columns
pub const LEDGER_SCALE: u32 = 18;

/// Decimal places of the native coin (wei)
pub const NATIVE_DECIMALS: u32 = 18;

// ============================================================================
// Error Types
// ============================================================================

/// Money conversion errors
#[derive(Debug, Error, PartialEq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

// ============================================================================
// Chain → Ledger
// ============================================================================

/// Parse a JSON-RPC hex quantity (`0x...`) into an unsigned integer
///
/// `0x0` is zero. A bare `0x` (empty log data) is rejected; callers that
/// treat empty data as "no amount" must check before parsing.
pub fn parse_quantity(hex_str: &str) -> Result<BigUint, MoneyError> {
    let trimmed = hex_str.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| MoneyError::InvalidFormat(format!("missing 0x prefix: {}", trimmed)))?;

    if digits.is_empty() {
        return Err(MoneyError::InvalidFormat("empty hex quantity".into()));
    }

    BigUint::parse_bytes(digits.as_bytes(), 16)
        .ok_or_else(|| MoneyError::InvalidFormat(format!("invalid hex quantity: {}", trimmed)))
}

/// Convert raw base units into a ledger amount (`raw / 10^decimals`)
///
/// Digits beyond what `Decimal` can represent are rounded, so a dust amount
/// of a token with more than 28 decimals may come back as zero.
///
/// # Errors
/// * `Overflow` - integer part does not fit a `Decimal`
pub fn format_units(raw: &BigUint, decimals: u32) -> Result<Decimal, MoneyError> {
    let digits = raw.to_str_radix(10);
    let width = decimals as usize + 1;
    let padded = format!("{:0>width$}", digits, width = width);
    let split = padded.len() - decimals as usize;

    let text = if decimals == 0 {
        padded
    } else {
        format!("{}.{}", &padded[..split], &padded[split..])
    };

    // The integer part must fit in 96 bits; the fraction may be rounded.
    if split > 29 {
        return Err(MoneyError::Overflow);
    }

    Decimal::from_str(&text).map_err(|_| MoneyError::Overflow)
}

// ============================================================================
// Ledger → Chain
// ============================================================================

/// Convert a positive ledger amount into base units (`amount * 10^decimals`)
///
/// # Errors
/// * `InvalidAmount` - zero or negative
/// * `PrecisionOverflow` - more fractional digits than the asset supports
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<BigUint, MoneyError> {
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }

    let amount = amount.normalize();
    if amount.scale() > decimals {
        return Err(MoneyError::PrecisionOverflow {
            provided: amount.scale(),
            max: decimals,
        });
    }

    let mantissa = u128::try_from(amount.mantissa()).map_err(|_| MoneyError::InvalidAmount)?;
    let factor = BigUint::from(10u32).pow(decimals - amount.scale());
    Ok(BigUint::from(mantissa) * factor)
}

/// Render an unsigned integer as a JSON-RPC hex quantity
pub fn to_quantity(value: &BigUint) -> String {
    format!("0x{:x}", value)
}

// ============================================================================
// Operator Input
// ============================================================================

/// Parse an operator-supplied amount string (e.g. "1.5") into a `Decimal`
///
/// Strict format: digits with an optional single fractional part, no sign,
/// no exponent, no leading or trailing dot.
pub fn parse_amount(amount_str: &str, decimals: u32) -> Result<Decimal, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let parts: Vec<&str> = amount_str.split('.').collect();
    let (whole, frac) = match parts.len() {
        1 => (parts[0], ""),
        2 => {
            if parts[0].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                ));
            }
            if parts[1].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                ));
            }
            (parts[0], parts[1])
        }
        _ => return Err(MoneyError::InvalidFormat("multiple decimal points".into())),
    };

    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in amount: {}",
            amount_str
        )));
    }

    if frac.len() > decimals as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: decimals,
        });
    }

    let amount = Decimal::from_str(amount_str).map_err(|_| MoneyError::Overflow)?;
    if amount.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }

    Ok(amount)
}
