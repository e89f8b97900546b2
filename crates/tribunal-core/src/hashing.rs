//! Content hashing for cache keys and audit snapshots.
//!
//! Hashes are rendered as `sha256:<hex>` so they can be exported alongside
//! audit records without revealing the hashed content.

use serde::Serialize;
use sha2::{Digest, Sha256};

const PREFIX: &str = "sha256:";

/// Hash raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{}{}", PREFIX, hex::encode(Sha256::digest(bytes)))
}

/// Hash the canonical JSON encoding of a value.
///
/// Callers must only pass types whose maps are ordered (`BTreeMap`), otherwise
/// the encoding is not stable across runs.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(sha256_hex(&bytes))
}

/// Incremental hasher over named fields.
///
/// Every field is length-prefixed so `("ab", "c")` and `("a", "bc")` never collide.
pub struct FieldHasher {
    hasher: Sha256,
}

impl FieldHasher {
    pub fn new(domain: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain.as_bytes());
        hasher.update([0u8]);
        Self { hasher }
    }

    pub fn field(mut self, name: &str, value: &[u8]) -> Self {
        self.hasher.update(name.as_bytes());
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value);
        self
    }

    pub fn finish(self) -> String {
        format!("{}{}", PREFIX, hex::encode(self.hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_hash_format() {
        let hash = sha256_hex(b"hello");
        assert!(hash.starts_with("sha256:"));
        assert_eq!(hash.len(), PREFIX.len() + 64);
    }

    #[test]
    fn test_content_hash_is_stable() {
        let mut map = BTreeMap::new();
        map.insert("b", 2);
        map.insert("a", 1);
        assert_eq!(content_hash(&map).unwrap(), content_hash(&map.clone()).unwrap());
    }

    #[test]
    fn test_field_boundaries_matter() {
        let left = FieldHasher::new("t").field("x", b"ab").field("y", b"c").finish();
        let right = FieldHasher::new("t").field("x", b"a").field("y", b"bc").finish();
        assert_ne!(left, right);
    }
}
