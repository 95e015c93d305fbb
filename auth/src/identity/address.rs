//! # Wallet Addresses
//!
//! Wallet providers hand us addresses in whatever casing they like:
//! checksummed mixed case, all upper, all lower. We never compare strings.
//! An address is parsed once into its raw bytes and printed back in
//! lowercase, so every lookup and comparison is case-insensitive without
//! anyone having to remember to normalize.
//!
//! ```text
//! "0xAbC…" ──parse──> [u8; 20] ──to_hex──> "0xabc…"
//! ```

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::{ADDRESS_BYTES, ADDRESS_PREFIX};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a string is not a wallet address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The `0x` prefix is missing.
    #[error("address must start with '0x'")]
    MissingPrefix,

    /// Wrong number of hex digits after the prefix.
    #[error("address must have {expected} hex digits, got {got}")]
    InvalidLength {
        /// Expected digit count.
        expected: usize,
        /// Digit count found.
        got: usize,
    },

    /// A character after the prefix is not a hex digit.
    #[error("address contains non-hex characters")]
    InvalidHex,
}

// ---------------------------------------------------------------------------
// WalletAddress
// ---------------------------------------------------------------------------

/// A normalized wallet address.
///
/// Holds the decoded bytes, so equality, hashing and ordering are all
/// case-insensitive with respect to the textual input.
///
/// # Examples
///
/// ```
/// use certgate_auth::identity::WalletAddress;
///
/// let upper = WalletAddress::parse("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA1").unwrap();
/// let lower = WalletAddress::parse("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1").unwrap();
/// assert_eq!(upper, lower);
/// assert_eq!(upper.to_hex(), "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletAddress([u8; ADDRESS_BYTES]);

impl WalletAddress {
    /// Parse and normalize a textual address.
    ///
    /// Leading and trailing whitespace is ignored. Both `0x` and `0X` are
    /// accepted as the prefix; the digits may be any case.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        let digits = trimmed
            .strip_prefix(ADDRESS_PREFIX)
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or(AddressError::MissingPrefix)?;

        if digits.len() != ADDRESS_BYTES * 2 {
            return Err(AddressError::InvalidLength {
                expected: ADDRESS_BYTES * 2,
                got: digits.len(),
            });
        }

        let mut bytes = [0u8; ADDRESS_BYTES];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| AddressError::InvalidHex)?;
        Ok(Self(bytes))
    }

    /// Wrap raw address bytes.
    pub fn from_bytes(bytes: [u8; ADDRESS_BYTES]) -> Self {
        Self(bytes)
    }

    /// The raw 20 bytes. Used as the storage key.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_BYTES] {
        &self.0
    }

    /// Canonical lowercase form, `0x` + 40 hex digits.
    pub fn to_hex(&self) -> String {
        format!("{}{}", ADDRESS_PREFIX, hex::encode(self.0))
    }

    /// Abbreviated form for display names and log lines: `0x1234...abcd`.
    pub fn short(&self) -> String {
        let full = hex::encode(self.0);
        format!("{}{}...{}", ADDRESS_PREFIX, &full[..4], &full[full.len() - 4..])
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletAddress({})", self.to_hex())
    }
}

impl FromStr for WalletAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for WalletAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for WalletAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const MIXED: &str = "0x52908400098527886E0F7030069857D2E4169EE7";
    const LOWER: &str = "0x52908400098527886e0f7030069857d2e4169ee7";

    #[test]
    fn case_variants_are_equal() {
        let a = WalletAddress::parse(MIXED).unwrap();
        let b = WalletAddress::parse(LOWER).unwrap();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn display_is_lowercase() {
        let addr = WalletAddress::parse(MIXED).unwrap();
        assert_eq!(addr.to_string(), LOWER);
    }

    #[test]
    fn uppercase_prefix_and_whitespace_accepted() {
        let addr = WalletAddress::parse("  0X52908400098527886E0F7030069857D2E4169EE7\n").unwrap();
        assert_eq!(addr.to_hex(), LOWER);
    }

    #[test]
    fn missing_prefix_rejected() {
        let err = WalletAddress::parse("52908400098527886e0f7030069857d2e4169ee7").unwrap_err();
        assert_eq!(err, AddressError::MissingPrefix);
    }

    #[test]
    fn wrong_length_rejected() {
        let err = WalletAddress::parse("0x1234").unwrap_err();
        assert_eq!(
            err,
            AddressError::InvalidLength {
                expected: 40,
                got: 4
            }
        );
    }

    #[test]
    fn non_hex_rejected() {
        let err = WalletAddress::parse("0xZZ908400098527886e0f7030069857d2e4169ee7").unwrap_err();
        assert_eq!(err, AddressError::InvalidHex);
    }

    #[test]
    fn short_form() {
        let addr = WalletAddress::parse(LOWER).unwrap();
        assert_eq!(addr.short(), "0x5290...9ee7");
    }

    #[test]
    fn serde_uses_canonical_string() {
        let addr = WalletAddress::parse(MIXED).unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{LOWER}\""));

        let back: WalletAddress = serde_json::from_str(&format!("\"{MIXED}\"")).unwrap();
        assert_eq!(back, addr);

        let bad: Result<WalletAddress, _> = serde_json::from_str("\"0xnope\"");
        assert!(bad.is_err());
    }
}
