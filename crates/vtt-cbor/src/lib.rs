//! Canonical CBOR helpers and stable SHA-256 digests for session state.
//!
//! Every digest the engine exposes (session hashes, persisted record hashes)
//! is computed over the canonical CBOR encoding produced here, so two values
//! that are structurally equal always hash identically regardless of how the
//! in-memory maps were built.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Prefix carried by every rendered digest.
pub const HASH_PREFIX: &str = "sha256:";

/// Canonical CBOR bytes for `value`: map keys sorted at every depth,
/// sequences positional, prefixed with the self-describe tag.
pub fn to_canonical_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_cbor::Error> {
    // `serde_cbor::Value` keeps maps in a BTreeMap, which fixes key order.
    let tree = serde_cbor::value::to_value(value)?;
    let mut out = Vec::new();
    let mut ser = serde_cbor::ser::Serializer::new(&mut out);
    ser.self_describe()?;
    tree.serialize(&mut ser)?;
    Ok(out)
}

pub fn from_canonical_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, serde_cbor::Error> {
    serde_cbor::from_slice(bytes)
}

/// SHA-256 digest, rendered as `sha256:<64 hex chars>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Digest of the canonical CBOR encoding of `value`.
    pub fn of_cbor<T: Serialize>(value: &T) -> Result<Self, serde_cbor::Error> {
        to_canonical_cbor(value).map(|bytes| Self::of_bytes(&bytes))
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 32];
        raw.copy_from_slice(&Sha256::digest(bytes));
        Hash(raw)
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(HASH_PREFIX.len() + 64);
        out.push_str(HASH_PREFIX);
        out.push_str(&hex::encode(self.0));
        out
    }

    pub fn from_hex_str(s: &str) -> Result<Self, HashParseError> {
        let Some(digits) = s.strip_prefix(HASH_PREFIX) else {
            return Err(HashParseError::MissingPrefix);
        };
        if digits.len() != 64 {
            return Err(HashParseError::InvalidLength(digits.len()));
        }
        let mut raw = [0u8; 32];
        hex::decode_to_slice(digits, &mut raw)?;
        Ok(Hash(raw))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

impl FromStr for Hash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex_str(s)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HashParseError {
    #[error("digest must start with '{HASH_PREFIX}'")]
    MissingPrefix,
    #[error("digest needs 64 hex characters, found {0}")]
    InvalidLength(usize),
    #[error("digest is not hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}
