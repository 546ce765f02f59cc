//! # Kachery Digest
//!
//! Digest primitives for kachery artifacts: the `(algorithm, hex)` identity
//! pair that every artifact is keyed by, streaming hash functions over files
//! and buffers, and the canonical-JSON digest helper used throughout the rest
//! of this codebase for content-addressed metadata (stat fingerprints,
//! range-cache codes, request signatures).
//!
//! ## Canonical JSON
//!
//! `canonical_json` relies on `serde_json`'s default map representation
//! (`BTreeMap`, lexicographically ordered) and its compact (non-pretty)
//! serializer to produce sorted-keys, no-whitespace JSON. This only holds as
//! long as the `preserve_order` feature of `serde_json` is disabled
//! workspace-wide — it must stay that way for every digest computed here to
//! remain stable.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod hash;

use std::fmt;
use std::str::FromStr;

pub use hash::{hash_bytes, hash_file};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Alg
// ============================================================================

/// A supported hash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alg {
    /// SHA-1 (40 hex characters).
    Sha1,
    /// MD5 (32 hex characters).
    Md5,
}

impl Alg {
    /// The lowercase name used in URIs, JSON keys, and environment variables.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
        }
    }

    /// The exact hex-digest length for this algorithm.
    #[must_use]
    pub fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => 40,
            Self::Md5 => 32,
        }
    }
}

impl FromStr for Alg {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha1" => Ok(Self::Sha1),
            "md5" => Ok(Self::Md5),
            _ => Err(Error::UnknownAlgorithm(s.to_owned())),
        }
    }
}

impl fmt::Display for Alg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Alg {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Alg {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Digest
// ============================================================================

/// A validated, lowercase hex digest under a known [`Alg`].
///
/// Construction validates both the character set (must be lowercase hex)
/// and the exact length for the given algorithm (40 for SHA-1, 32 for MD5).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[must_use = "digests should not be discarded"]
pub struct Digest {
    alg: Alg,
    hex: String,
}

impl Digest {
    /// Validate and construct a digest from a hex string.
    pub fn new(alg: Alg, hex: impl Into<String>) -> Result<Self, Error> {
        let hex = hex.into();
        if hex.len() != alg.digest_len() {
            return Err(Error::InvalidLength {
                alg,
                expected: alg.digest_len(),
                actual: hex.len(),
            });
        }
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) || hex.bytes().any(|b| b.is_ascii_uppercase())
        {
            return Err(Error::InvalidHex(hex));
        }
        Ok(Self { alg, hex })
    }

    /// The algorithm this digest is under.
    #[must_use]
    pub fn alg(&self) -> Alg {
        self.alg
    }

    /// The hex digest string.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

// ============================================================================
// Canonical JSON
// ============================================================================

/// Serialize `value` as canonical JSON: lexicographically sorted keys, no
/// whitespace, UTF-8 encoded.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let as_value = serde_json::to_value(value)?;
    serde_json::to_string(&as_value).map_err(Error::from)
}

/// Compute the SHA-1 digest of `value`'s canonical JSON form.
///
/// Used for stat-fingerprint keys, range-cache codes, and remote-protocol
/// request signatures — everywhere this codebase needs a byte-identical
/// serialization to hash.
pub fn digest_of_canonical_json<T: Serialize>(value: &T) -> Result<Digest, Error> {
    let json = canonical_json(value)?;
    Ok(hash_bytes(json.as_bytes(), Alg::Sha1))
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced by digest construction and hashing.
#[derive(Error, Debug)]
pub enum Error {
    /// The hex string is the wrong length for its algorithm.
    #[error("{alg} digest must be {expected} hex characters, got {actual}")]
    InvalidLength {
        /// The algorithm that was expected.
        alg: Alg,
        /// The expected digest length.
        expected: usize,
        /// The actual length received.
        actual: usize,
    },
    /// The string contains non-hex or uppercase-hex characters.
    #[error("not a lowercase hex string: '{0}'")]
    InvalidHex(String),
    /// Unrecognized algorithm name.
    #[error("unknown algorithm: '{0}'")]
    UnknownAlgorithm(String),
    /// Underlying I/O failure while hashing a file.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Failure serializing a value to canonical JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alg_roundtrip_name() {
        assert_eq!(Alg::from_str("sha1").unwrap(), Alg::Sha1);
        assert_eq!(Alg::from_str("md5").unwrap(), Alg::Md5);
        assert!(Alg::from_str("sha256").is_err());
    }

    #[test]
    fn digest_rejects_wrong_length() {
        assert!(matches!(
            Digest::new(Alg::Sha1, "abc"),
            Err(Error::InvalidLength { .. })
        ));
    }

    #[test]
    fn digest_rejects_uppercase() {
        let hex = "A".repeat(40);
        assert!(matches!(Digest::new(Alg::Sha1, hex), Err(Error::InvalidHex(_))));
    }

    #[test]
    fn digest_accepts_valid_sha1() {
        let hex = "a".repeat(40);
        let d = Digest::new(Alg::Sha1, hex.clone()).unwrap();
        assert_eq!(d.hex(), hex);
        assert_eq!(d.alg(), Alg::Sha1);
        assert_eq!(d.to_string(), hex);
    }

    #[test]
    fn canonical_json_sorts_keys_and_strips_whitespace() {
        #[derive(Serialize)]
        struct Obj {
            b: u32,
            a: u32,
        }
        let json = canonical_json(&Obj { b: 2, a: 1 }).unwrap();
        assert_eq!(json, r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn digest_of_canonical_json_matches_known_value() {
        // sha1 of the canonical json for {"a":1} should be stable and
        // independent of field insertion order upstream.
        let d1 = digest_of_canonical_json(&serde_json::json!({"a": 1, "b": 2})).unwrap();
        let d2 = digest_of_canonical_json(&serde_json::json!({"b": 2, "a": 1})).unwrap();
        assert_eq!(d1.hex(), d2.hex());
    }
}
