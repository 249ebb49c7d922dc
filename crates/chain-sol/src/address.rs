//! Solana identities: public keys and blockhashes.
//!
//! Both are plain 32-byte values rendered as Base58. A [`Pubkey`] is compared
//! by byte equality only; nothing here knows (or needs) the private half.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SolError;

/// A 32-byte account identity (Ed25519 public key or program address).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pubkey(pub [u8; 32]);

/// A 32-byte recent blockhash, the freshness anchor of a transaction.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Hash(pub [u8; 32]);

impl Pubkey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Pubkey(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Decode a Base58 address string.
    pub fn from_base58(address: &str) -> Result<Self, SolError> {
        address_to_bytes(address).map(Pubkey)
    }

    pub fn to_base58(&self) -> String {
        bytes_to_address(&self.0)
    }
}

impl Hash {
    pub fn from_base58(value: &str) -> Result<Self, SolError> {
        address_to_bytes(value).map(Hash)
    }

    pub fn to_base58(&self) -> String {
        bytes_to_address(&self.0)
    }
}

impl AsRef<[u8]> for Pubkey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Pubkey {
    fn from(bytes: [u8; 32]) -> Self {
        Pubkey(bytes)
    }
}

impl FromStr for Pubkey {
    type Err = SolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pubkey::from_base58(s)
    }
}

impl FromStr for Hash {
    type Err = SolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::from_base58(s)
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pubkey({})", self.to_base58())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_base58())
    }
}

// Serialized as Base58 strings so JSON payloads carry the familiar form.

impl Serialize for Pubkey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for Pubkey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Pubkey::from_base58(&s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_base58(&s).map_err(serde::de::Error::custom)
    }
}

/// Decode a Solana address string to its 32-byte representation.
pub fn address_to_bytes(address: &str) -> Result<[u8; 32], SolError> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| SolError::InvalidAddress(format!("base58 decode failed: {e}")))?;

    let arr: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
        SolError::InvalidAddress(format!("expected 32 bytes, got {}", v.len()))
    })?;

    Ok(arr)
}

/// Encode 32 bytes as a Solana address (Base58 string).
pub fn bytes_to_address(bytes: &[u8; 32]) -> String {
    bs58::encode(bytes).into_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_program_address() {
        let zeros = Pubkey::default();
        assert_eq!(zeros.to_base58(), "11111111111111111111111111111111");
    }

    #[test]
    fn roundtrip_through_display_and_parse() {
        let address = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
        let key: Pubkey = address.parse().unwrap();
        assert_eq!(key.to_string(), address);
    }

    #[test]
    fn equality_is_bytewise() {
        let a = Pubkey::new([7u8; 32]);
        let b = Pubkey::from([7u8; 32]);
        let c = Pubkey::new([8u8; 32]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn garbage_is_not_an_address() {
        let err = Pubkey::from_base58("not-a-valid-address!!!").unwrap_err();
        assert!(matches!(err, SolError::InvalidAddress(_)));
    }

    #[test]
    fn validate_too_short_returns_error() {
        // "1" decodes to a single zero byte.
        let err = Pubkey::from_base58("1").unwrap_err();
        assert!(err.to_string().contains("expected 32 bytes"));
    }

    #[test]
    fn serde_uses_base58_strings() {
        let key = Pubkey::from_base58("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr\"");

        let back: Pubkey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn serde_rejects_short_keys() {
        let result: Result<Pubkey, _> = serde_json::from_str("\"1111\"");
        assert!(result.is_err());
    }

    #[test]
    fn hash_roundtrip() {
        let hash = Hash([0xAB; 32]);
        let parsed = Hash::from_base58(&hash.to_base58()).unwrap();
        assert_eq!(parsed, hash);
    }

    #[test]
    fn debug_shows_base58() {
        let debug = format!("{:?}", Pubkey::default());
        assert_eq!(debug, "Pubkey(11111111111111111111111111111111)");
    }
}
