// crates/woo-core/src/types.rs
//
// Identifiers and scalar aliases shared by every crate in the workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::StakingError;

/// Token amount in the smallest unit of the token (18 decimals for WOO).
pub type Amount = u128;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Block height on the home domain.
pub type BlockNumber = u64;

/// Messaging-layer domain (chain) id, e.g. 110 for Arbitrum.
pub type DomainId = u16;

/// Per-path message sequence number.
pub type Nonce = u64;

/// One whole token at 18 decimals.
pub const ONE_TOKEN: Amount = 1_000_000_000_000_000_000;

/// A 20-byte account or contract identifier.
///
/// Users, vaults, rewarders, and trackers are all addressed the same way so
/// that capability sets (admins, handlers) can hold any of them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);

/// Tokens are identified by the address of their ledger entry.
pub type TokenId = Address;

impl Address {
    /// The all-zero address.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Build an address whose last byte is `n`. Handy for fixtures and
    /// configuration defaults.
    pub const fn from_low_u8(n: u8) -> Self {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        Address(bytes)
    }

    /// A random address.
    pub fn random() -> Self {
        Address(rand::random::<[u8; 20]>())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = StakingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)
            .map_err(|e| StakingError::InvalidInput(format!("invalid address {}: {}", s, e)))?;
        let arr: [u8; 20] = bytes.try_into().map_err(|_| {
            StakingError::InvalidInput(format!("address {} must be exactly 20 bytes", s))
        })?;
        Ok(Address(arr))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_roundtrip() {
        let addr = Address::from_low_u8(0xab);
        let s = addr.to_string();
        assert_eq!(s, "0x00000000000000000000000000000000000000ab");
        assert_eq!(s.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn test_parse_without_prefix() {
        let addr: Address = "cafcd85d8ca7ad1e1c6f82f651fa15e33aefd07b".parse().unwrap();
        assert_eq!(addr.0[0], 0xca);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xzz".parse::<Address>().is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let addr = Address::from_low_u8(7);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0x0000000000000000000000000000000000000007\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_zero() {
        assert!(Address::ZERO.is_zero());
        assert!(!Address::from_low_u8(1).is_zero());
    }
}
