use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Monotonic per-session state version.
///
/// Held as a `u64`, exposed as an opaque decimal string token (`"0"`, `"1"`, ...).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version(u64);

impl Version {
    pub const ZERO: Version = Version(0);

    pub const fn new(raw: u64) -> Self {
        Version(raw)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }

    /// The version that follows this one, or `None` on counter exhaustion.
    pub fn next(&self) -> Option<Version> {
        self.0.checked_add(1).map(Version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid version token '{0}'")]
pub struct VersionParseError(pub String);

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(VersionParseError(s.to_string()));
        }
        s.parse::<u64>()
            .map(Version)
            .map_err(|_| VersionParseError(s.to_string()))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(VersionVisitor)
    }
}

struct VersionVisitor;

impl<'de> Visitor<'de> for VersionVisitor {
    type Value = Version;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal version token")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Version, E> {
        v.parse().map_err(E::custom)
    }

    // Tolerate clients that send the token as a bare number.
    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Version, E> {
        Ok(Version(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_a_decimal_string() {
        let v = Version::new(42);
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"42\"");
        let back: Version = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(back, v);
        let bare: Version = serde_json::from_str("7").unwrap();
        assert_eq!(bare, Version::new(7));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!("".parse::<Version>().is_err());
        assert!("-1".parse::<Version>().is_err());
        assert!("+1".parse::<Version>().is_err());
        assert!("1a".parse::<Version>().is_err());
        assert!(serde_json::from_str::<Version>("\"x\"").is_err());
    }

    #[test]
    fn next_saturates_to_none() {
        assert_eq!(Version::ZERO.next(), Some(Version::new(1)));
        assert_eq!(Version::new(u64::MAX).next(), None);
    }
}
