//! Input validation for addresses, user ids and usernames
//!
//! This module provides validated types that are normalized on construction.
//! All fields are private to force validation through the public API.

use std::fmt;

/// Highest user id that maps to a non-hardened BIP32 child index
pub const MAX_USER_ID: i64 = (1 << 31) - 1;

// ============================================================================
// Validation Errors
// ============================================================================

/// Validation errors for caller-supplied input
///
/// Raised before any I/O happens.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid length for {field}: expected {min}-{max}, got {actual}")]
    InvalidLength {
        field: &'static str,
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("Invalid format for {field}: '{value}' (expected: {expected})")]
    InvalidFormat {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid user id {got}: must be between 0 and {max}")]
    UserIdOutOfRange { got: i64, max: i64 },
}

// ============================================================================
// EvmAddress - Normalized 20-byte account address
// ============================================================================

/// Validated EVM address, stored lower-case with `0x` prefix
///
/// Equality is therefore case-insensitive with respect to the raw input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvmAddress(String);

impl EvmAddress {
    /// Create a new validated EvmAddress
    ///
    /// # Normalization
    /// - Surrounding whitespace is trimmed
    /// - C0/C1 control characters are stripped
    /// - Result is lower-cased
    ///
    /// # Validation Rules
    /// - Regex: ^0x[0-9a-fA-F]{40}$
    ///
    /// # Examples
    /// ```
    /// use deposit_sentinel::account::validation::EvmAddress;
    ///
    /// let addr = EvmAddress::new(" 0xD8dA6BF26964aF9D7eEd9e03E53415D37aA96045\n").unwrap();
    /// assert_eq!(addr.as_str(), "0xd8da6bf26964af9d7eed9e03e53415d37aa96045");
    ///
    /// assert!(EvmAddress::new("0x1234").is_err());
    /// ```
    pub fn new(raw: &str) -> Result<Self, ValidationError> {
        let cleaned: String = raw.trim().chars().filter(|c| !c.is_control()).collect();

        if cleaned.len() != 42 {
            return Err(ValidationError::InvalidLength {
                field: "address",
                min: 42,
                max: 42,
                actual: cleaned.len(),
            });
        }

        let hex_part = cleaned
            .strip_prefix("0x")
            .or_else(|| cleaned.strip_prefix("0X"))
            .filter(|h| h.chars().all(|c| c.is_ascii_hexdigit()));

        match hex_part {
            Some(hex_part) => Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase()))),
            None => Err(ValidationError::InvalidFormat {
                field: "address",
                value: cleaned,
                expected: "0x followed by 40 hex characters",
            }),
        }
    }

    /// Build from the low 20 bytes of a 32-byte indexed log topic
    pub fn from_topic(topic: &str) -> Result<Self, ValidationError> {
        let trimmed = topic.trim();
        let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if hex_part.len() != 64 || !hex_part.is_ascii() {
            return Err(ValidationError::InvalidLength {
                field: "topic",
                min: 64,
                max: 64,
                actual: hex_part.len(),
            });
        }
        Self::new(&format!("0x{}", &hex_part[24..]))
    }

    /// Get the normalized address as &str
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert into owned String
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for EvmAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for EvmAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// User id / Username
// ============================================================================

/// Validate a user id and return it as a non-hardened child index
pub fn validate_user_id(user_id: i64) -> Result<u32, ValidationError> {
    if !(0..=MAX_USER_ID).contains(&user_id) {
        return Err(ValidationError::UserIdOutOfRange {
            got: user_id,
            max: MAX_USER_ID,
        });
    }
    Ok(user_id as u32)
}

/// Validated display name (1-255 printable characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(String);

impl Username {
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        let name = name.trim();

        if name.is_empty() || name.len() > 255 {
            return Err(ValidationError::InvalidLength {
                field: "username",
                min: 1,
                max: 255,
                actual: name.len(),
            });
        }

        if name.chars().any(|c| c.is_control()) {
            return Err(ValidationError::InvalidFormat {
                field: "username",
                value: name.escape_default().to_string(),
                expected: "printable characters only",
            });
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VITALIK: &str = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045";

    #[test]
    fn test_address_normalized_lowercase() {
        let addr = EvmAddress::new(VITALIK).unwrap();
        assert_eq!(addr.as_str(), "0xd8da6bf26964af9d7eed9e03e53415d37aa96045");

        let upper = EvmAddress::new(&VITALIK.to_uppercase().replacen("0X", "0x", 1)).unwrap();
        assert_eq!(addr, upper);
    }

    #[test]
    fn test_address_strips_whitespace_and_controls() {
        let dirty = format!("  \u{0000}{}\u{009F}\t\n", VITALIK);
        let addr = EvmAddress::new(&dirty).unwrap();
        assert_eq!(addr, EvmAddress::new(VITALIK).unwrap());
    }

    #[test]
    fn test_address_rejects_malformed() {
        let cases = vec![
            "",
            "0x",
            "0x1234",
            "d8dA6BF26964aF9D7eEd9e03E53415D37aA96045",     // no prefix
            "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA9604G",   // non-hex
            "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA960451",  // too long
            "0x d8dA6BF26964aF9D7eEd9e03E53415D37aA9604",   // inner space
        ];

        for case in cases {
            assert!(EvmAddress::new(case).is_err(), "Should reject: {:?}", case);
        }
    }

    #[test]
    fn test_address_from_topic() {
        let topic = "0x000000000000000000000000d8da6bf26964af9d7eed9e03e53415d37aa96045";
        let addr = EvmAddress::from_topic(topic).unwrap();
        assert_eq!(addr, EvmAddress::new(VITALIK).unwrap());

        assert!(EvmAddress::from_topic("0x1234").is_err());
    }

    #[test]
    fn test_validate_user_id() {
        assert_eq!(validate_user_id(0).unwrap(), 0);
        assert_eq!(validate_user_id(42).unwrap(), 42);
        assert_eq!(validate_user_id(MAX_USER_ID).unwrap(), u32::MAX >> 1);

        assert!(matches!(
            validate_user_id(-1),
            Err(ValidationError::UserIdOutOfRange { got: -1, .. })
        ));
        assert!(validate_user_id(MAX_USER_ID + 1).is_err());
    }

    #[test]
    fn test_username() {
        assert_eq!(Username::new("  alice ").unwrap().as_str(), "alice");
        assert!(Username::new("").is_err());
        assert!(Username::new("bad\nname").is_err());
        assert!(Username::new(&"x".repeat(256)).is_err());
    }
}
