//! Stable hashing helpers for plan fingerprints and plan digests.

use blake3::Hasher;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        // blake3 hex(32b) is 64 hex chars
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash256 {
    let mut h = Hasher::new();
    h.update(bytes);
    let out = h.finalize();
    Hash256(out.into())
}

/// Hash any serde-serializable value deterministically (via JSON).
/// NOTE: fine for whole-plan digests; fingerprints use `FingerprintBuilder`.
pub fn hash_serde<T: Serialize>(v: &T) -> Result<Hash256, crate::error::Error> {
    let bytes = serde_json::to_vec(v).map_err(|e| crate::error::Error::Hash(e.to_string()))?;
    Ok(hash_bytes(&bytes))
}

/// Deterministic identity of a logical subtree: operator, operands, child
/// fingerprints (in order) and the versions of the datasets it scans.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlanFingerprint(pub Hash256);

impl PlanFingerprint {
    /// First 12 hex chars; enough to tell fingerprints apart in logs.
    pub fn short(&self) -> String {
        let mut hex = self.0.to_hex();
        hex.truncate(12);
        hex
    }
}

impl std::fmt::Display for PlanFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremental fingerprint hasher.
///
/// Every field is length-prefixed so adjacent operands can never alias
/// (`["ab","c"]` and `["a","bc"]` hash differently).
pub struct FingerprintBuilder {
    hasher: Hasher,
}

impl FingerprintBuilder {
    pub fn new(tag: &str) -> Self {
        let mut b = Self {
            hasher: Hasher::new(),
        };
        b.hasher.update(b"planwise/fp/v1");
        b.str(tag);
        b
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.hasher.update(&v.to_le_bytes());
        self
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        self.u64(s.len() as u64);
        self.hasher.update(s.as_bytes());
        self
    }

    pub fn strs<S: AsRef<str>>(&mut self, items: &[S]) -> &mut Self {
        self.u64(items.len() as u64);
        for s in items {
            self.str(s.as_ref());
        }
        self
    }

    /// Hash a serializable operand (predicates, aggregations) through JSON.
    pub fn serde<T: Serialize>(&mut self, v: &T) -> Result<&mut Self, crate::error::Error> {
        let bytes = serde_json::to_vec(v)?;
        self.u64(bytes.len() as u64);
        self.hasher.update(&bytes);
        Ok(self)
    }

    pub fn child(&mut self, fp: &PlanFingerprint) -> &mut Self {
        self.hasher.update(&fp.0 .0);
        self
    }

    pub fn finish(&self) -> PlanFingerprint {
        PlanFingerprint(Hash256(self.hasher.finalize().into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_prevents_aliasing() {
        let a = FingerprintBuilder::new("project").strs(&["ab", "c"]).finish();
        let b = FingerprintBuilder::new("project").strs(&["a", "bc"]).finish();
        assert_ne!(a, b);
    }

    #[test]
    fn same_input_same_fingerprint() {
        let a = FingerprintBuilder::new("scan").str("users").u64(1).finish();
        let b = FingerprintBuilder::new("scan").str("users").u64(1).finish();
        assert_eq!(a, b);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn hex_is_64_chars() {
        assert_eq!(hash_bytes(b"planwise").to_hex().len(), 64);
    }
}
