//! Runtime configuration.
//!
//! One YAML document configures the whole runtime: evaluators and their
//! weights, mode presets, timeouts, cache and compliance. Every field has a
//! default, so an empty document is a valid (if evaluator-less) config.
//!
//! ```yaml
//! timeouts:
//!   evaluator: 30s
//!   arbitration: 45s
//! cache:
//!   ttl: 1h
//! evaluators:
//!   - name: primary
//!     provider: anthropic
//!     model: claude-sonnet-4-5-20250514
//!     weight: 0.55
//!     arbiter: true
//! arbiter: primary
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tribunal_core::{
    AggregatorConfig, EscalationConfig, ModePresets, PackerConfig, PrefilterConfig,
};

use crate::cache::CacheSettings;
use crate::compliance::ComplianceSettings;
use crate::prompts::InstructionSettings;
use crate::providers::ProviderError;
use crate::resilience::{BudgetSettings, RetrySettings};

/// Environment variable naming a YAML config file.
pub const CONFIG_ENV: &str = "TRIBUNAL_CONFIG";

/// Instruction lookup key used when none is configured.
pub const DEFAULT_DOMAIN_KEY: &str = "candidate-screening";

/// Errors raised while loading or checking configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    /// A role names an evaluator that is not configured.
    #[error("{role} '{name}' is not a configured evaluator")]
    UnknownEvaluator { name: String, role: &'static str },

    /// A role names an evaluator that cannot perform it.
    #[error("evaluator '{name}' cannot act as {capability}")]
    MissingCapability {
        name: String,
        capability: &'static str,
    },

    #[error("evaluator '{evaluator}': {source}")]
    Provider {
        evaluator: String,
        #[source]
        source: ProviderError,
    },
}

/// Serde adapter for durations written as `"30s"`, `"1h 30m"`, `"250ms"`.
pub mod human_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutSettings {
    /// Bound on every evaluation call
    #[serde(default = "default_evaluator_timeout", with = "human_duration")]
    pub evaluator: Duration,

    #[serde(default = "default_arbitration_timeout", with = "human_duration")]
    pub arbitration: Duration,

    #[serde(default = "default_extraction_timeout", with = "human_duration")]
    pub extraction: Duration,
}

fn default_evaluator_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_arbitration_timeout() -> Duration {
    Duration::from_secs(45)
}

fn default_extraction_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            evaluator: default_evaluator_timeout(),
            arbitration: default_arbitration_timeout(),
            extraction: default_extraction_timeout(),
        }
    }
}

/// One evaluator backend built from a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluatorConfig {
    pub name: String,

    /// Provider type registered in the [`crate::providers::ProviderRegistry`]
    pub provider: String,

    pub model: String,

    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,

    /// Passed verbatim to the provider factory
    #[serde(default)]
    pub provider_config: serde_json::Value,

    /// Offer the extraction capability
    #[serde(default)]
    pub extractor: bool,

    /// Offer the arbitration capability
    #[serde(default)]
    pub arbiter: bool,
}

fn default_weight() -> f64 {
    1.0
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_domain_key() -> String {
    DEFAULT_DOMAIN_KEY.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub timeouts: TimeoutSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub budget: BudgetSettings,

    #[serde(default)]
    pub prefilter: PrefilterConfig,

    #[serde(default)]
    pub packer: PackerConfig,

    #[serde(default)]
    pub escalation: EscalationConfig,

    #[serde(default)]
    pub aggregator: AggregatorConfig,

    #[serde(default)]
    pub modes: ModePresets,

    #[serde(default)]
    pub compliance: ComplianceSettings,

    #[serde(default)]
    pub instructions: InstructionSettings,

    /// Key of the domain-specific instruction to send
    #[serde(default = "default_domain_key")]
    pub domain_key: String,

    /// Evaluators in priority order; the first is the primary
    #[serde(default)]
    pub evaluators: Vec<EvaluatorConfig>,

    #[serde(default)]
    pub arbiter: Option<String>,

    #[serde(default)]
    pub extractor: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutSettings::default(),
            cache: CacheSettings::default(),
            retry: RetrySettings::default(),
            budget: BudgetSettings::default(),
            prefilter: PrefilterConfig::default(),
            packer: PackerConfig::default(),
            escalation: EscalationConfig::default(),
            aggregator: AggregatorConfig::default(),
            modes: ModePresets::default(),
            compliance: ComplianceSettings::default(),
            instructions: InstructionSettings::default(),
            domain_key: default_domain_key(),
            evaluators: Vec::new(),
            arbiter: None,
            extractor: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Load the file named by `TRIBUNAL_CONFIG`, or the defaults when unset.
    pub fn from_env_or_default() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_yaml_file(path.trim()),
            _ => Ok(Self::default()),
        }
    }

    pub fn evaluator(&self, name: &str) -> Option<&EvaluatorConfig> {
        self.evaluators.iter().find(|e| e.name == name)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timeouts;
        if t.evaluator.is_zero() || t.arbitration.is_zero() || t.extraction.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        if self.domain_key.trim().is_empty() {
            return Err(ConfigError::Invalid("domain_key must not be empty".to_string()));
        }

        self.modes.validate().map_err(ConfigError::Invalid)?;
        self.retry.validate().map_err(ConfigError::Invalid)?;
        self.budget.validate().map_err(ConfigError::Invalid)?;
        self.cache.validate().map_err(ConfigError::Invalid)?;

        let mut names = BTreeSet::new();
        for evaluator in &self.evaluators {
            if evaluator.name.trim().is_empty() {
                return Err(ConfigError::Invalid("evaluator name must not be empty".to_string()));
            }
            if !names.insert(evaluator.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate evaluator name '{}'",
                    evaluator.name
                )));
            }
            if !evaluator.weight.is_finite() || evaluator.weight < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "evaluator '{}' has invalid weight {}",
                    evaluator.name, evaluator.weight
                )));
            }
        }

        for (role, capability, chosen) in [
            ("arbiter", "an arbiter", &self.arbiter),
            ("extractor", "an extractor", &self.extractor),
        ] {
            let Some(name) = chosen else { continue };
            let evaluator = self
                .evaluator(name)
                .ok_or_else(|| ConfigError::UnknownEvaluator {
                    name: name.clone(),
                    role,
                })?;
            let capable = match role {
                "arbiter" => evaluator.arbiter,
                _ => evaluator.extractor,
            };
            if !capable {
                return Err(ConfigError::MissingCapability {
                    name: name.clone(),
                    capability,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::MaskingLevel;
    use tribunal_core::Mode;

    const CONFIG: &str = r#"
timeouts:
  evaluator: 20s
  arbitration: 1m
cache:
  ttl: 30m
budget:
  max_request_cost_usd: 0.25
modes:
  balanced:
    escalation_min_triggers: 3
    additional_evaluators: 1
    arbitrate_on: [weak]
instructions:
  general: "Be conservative."
  domains:
    candidate-screening: "Screen for the role only."
evaluators:
  - name: primary
    provider: anthropic
    model: claude-sonnet-4-5-20250514
    weight: 0.55
    arbiter: true
    extractor: true
  - name: second
    provider: anthropic
    model: claude-haiku-4-5
    weight: 0.30
arbiter: primary
extractor: primary
"#;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.timeouts.evaluator, Duration::from_secs(30));
        assert_eq!(config.timeouts.arbitration, Duration::from_secs(45));
        assert_eq!(config.cache.ttl, Duration::from_secs(3600));
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.prefilter.min_keyword_similarity, 0.05);
        assert_eq!(config.escalation.min_evidence, 3);
        assert_eq!(config.compliance.masking, MaskingLevel::Partial);
        assert_eq!(config.domain_key, "candidate-screening");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(RuntimeConfig::from_yaml("{}").unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn test_from_yaml() {
        let config = RuntimeConfig::from_yaml(CONFIG).unwrap();
        assert_eq!(config.timeouts.evaluator, Duration::from_secs(20));
        assert_eq!(config.timeouts.arbitration, Duration::from_secs(60));
        assert_eq!(config.timeouts.extraction, Duration::from_secs(30));
        assert_eq!(config.cache.ttl, Duration::from_secs(1800));
        assert_eq!(config.modes.policy(Mode::Balanced).escalation_min_triggers, Some(3));
        assert_eq!(config.modes.policy(Mode::Premium), &tribunal_core::ModePolicy::premium());
        assert_eq!(config.evaluators.len(), 2);
        assert_eq!(config.evaluator("second").unwrap().weight, 0.30);
        assert_eq!(config.evaluator("second").unwrap().max_tokens, 4096);
        assert_eq!(config.budget.max_request_cost_usd, Some(0.25));
    }

    #[test]
    fn test_durations_round_trip_in_human_form() {
        let yaml = serde_yaml::to_string(&TimeoutSettings::default()).unwrap();
        assert!(yaml.contains("evaluator: 30s"), "{}", yaml);
        let back: TimeoutSettings = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, TimeoutSettings::default());
    }

    #[test]
    fn test_bad_duration_is_a_parse_error() {
        let err = RuntimeConfig::from_yaml("timeouts:\n  evaluator: soon\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_unknown_arbiter() {
        let yaml = CONFIG.replace("arbiter: primary", "arbiter: third");
        match RuntimeConfig::from_yaml(&yaml) {
            Err(ConfigError::UnknownEvaluator { name, role }) => {
                assert_eq!(name, "third");
                assert_eq!(role, "arbiter");
            }
            other => panic!("expected UnknownEvaluator, got {:?}", other),
        }
    }

    #[test]
    fn test_arbiter_without_capability() {
        let yaml = CONFIG.replace("arbiter: primary", "arbiter: second");
        assert!(matches!(
            RuntimeConfig::from_yaml(&yaml),
            Err(ConfigError::MissingCapability { .. })
        ));
    }

    #[test]
    fn test_duplicate_evaluator_names() {
        let yaml = CONFIG.replace("name: second", "name: primary");
        assert!(matches!(RuntimeConfig::from_yaml(&yaml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = RuntimeConfig::from_yaml_file("/nonexistent/tribunal.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/tribunal.yaml"));
    }
}
