//! Decision cache.
//!
//! Stores serialized decisions under a content hash of everything that
//! determines them. Entries are never updated in place; they expire by TTL.
//! Concurrent misses for the same key may both compute and both write, the
//! last write wins.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tribunal_core::hashing::FieldHasher;
use tribunal_core::{CandidateRecord, Mode};

use crate::compliance::MaskingLevel;

const DECISION_DOMAIN: &str = "tribunal.decision.v1";
const RAW_DOMAIN: &str = "tribunal.raw.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_ttl", with = "crate::config::human_duration")]
    pub ttl: Duration,

    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_entries() -> u64 {
    10_000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ttl: default_ttl(),
            max_entries: default_max_entries(),
        }
    }
}

impl CacheSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.ttl.is_zero() {
            return Err("cache.ttl must be positive".to_string());
        }
        if self.enabled && self.max_entries == 0 {
            return Err("cache.max_entries must be positive".to_string());
        }
        Ok(())
    }
}

/// A failed cache operation. Always soft: the controller treats it as a miss.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cached entry is unreadable: {0}")]
    Corrupt(String),

    #[error("failed to encode decision: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Key/value store for serialized decisions.
#[async_trait]
pub trait DecisionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn put(&self, key: String, value: String) -> Result<(), CacheError>;
}

/// In-process store backed by moka.
pub struct MokaDecisionStore {
    cache: Cache<String, String>,
}

impl MokaDecisionStore {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.max_entries, settings.ttl)
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for MokaDecisionStore {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}

#[async_trait]
impl DecisionStore for MokaDecisionStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.cache.get(key).await)
    }

    async fn put(&self, key: String, value: String) -> Result<(), CacheError> {
        self.cache.insert(key, value).await;
        Ok(())
    }
}

/// Key for a decision on a structured record.
pub fn decision_key(
    record: &CandidateRecord,
    job_hash: &str,
    mode: Mode,
    masking: MaskingLevel,
) -> Result<String, CacheError> {
    let record = serde_json::to_vec(record)?;
    Ok(FieldHasher::new(DECISION_DOMAIN)
        .field("record", &record)
        .field("job", job_hash.as_bytes())
        .field("mode", mode.as_str().as_bytes())
        .field("masking", masking.as_str().as_bytes())
        .finish())
}

/// Key for a decision on raw, not yet extracted input.
pub fn raw_key(raw: &str, job_hash: &str, mode: Mode, masking: MaskingLevel) -> String {
    FieldHasher::new(RAW_DOMAIN)
        .field("raw", raw.as_bytes())
        .field("job", job_hash.as_bytes())
        .field("mode", mode.as_str().as_bytes())
        .field("masking", masking.as_str().as_bytes())
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_record;

    #[tokio::test]
    async fn test_store_roundtrip() {
        let store = MokaDecisionStore::default();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.put("k".to_string(), "{}".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("{}"));

        store.put("k".to_string(), "[]".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn test_decision_key_covers_every_input() {
        let record = sample_record();
        let base = decision_key(&record, "sha256:job", Mode::Balanced, MaskingLevel::Partial).unwrap();

        assert_eq!(
            base,
            decision_key(&record, "sha256:job", Mode::Balanced, MaskingLevel::Partial).unwrap()
        );
        assert_ne!(base, decision_key(&record, "sha256:other", Mode::Balanced, MaskingLevel::Partial).unwrap());
        assert_ne!(base, decision_key(&record, "sha256:job", Mode::Premium, MaskingLevel::Partial).unwrap());
        assert_ne!(base, decision_key(&record, "sha256:job", Mode::Balanced, MaskingLevel::Full).unwrap());

        let mut changed = record.clone();
        changed.skills.push("Haskell".to_string());
        assert_ne!(base, decision_key(&changed, "sha256:job", Mode::Balanced, MaskingLevel::Partial).unwrap());
    }

    #[test]
    fn test_raw_and_structured_keys_never_collide() {
        let record = sample_record();
        let json = serde_json::to_string(&record).unwrap();
        assert_ne!(
            raw_key(&json, "sha256:job", Mode::Eco, MaskingLevel::None),
            decision_key(&record, "sha256:job", Mode::Eco, MaskingLevel::None).unwrap()
        );
    }

    #[test]
    fn test_settings_validation() {
        assert!(CacheSettings::default().validate().is_ok());
        let settings = CacheSettings {
            ttl: Duration::ZERO,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        let disabled = CacheSettings {
            enabled: false,
            ttl: Duration::ZERO,
            ..Default::default()
        };
        assert!(disabled.validate().is_ok());
    }
}
