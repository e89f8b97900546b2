//! The set of evaluators a controller may call.
//!
//! Built once at startup and shared by `Arc`; there is no global registry.
//! Registration order is priority order: the first evaluator is the primary
//! and the reference for per-experience detail.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Arbiter, EvaluatorBackend, Extractor};
use crate::config::{ConfigError, RuntimeConfig};
use crate::evaluators::LlmEvaluator;
use crate::providers::ProviderRegistry;

pub struct EvaluatorRegistry {
    backends: BTreeMap<String, Arc<dyn EvaluatorBackend>>,
    priority: Vec<String>,
    weights: BTreeMap<String, f64>,
    arbiter: Option<String>,
    extractor: Option<String>,
}

impl EvaluatorRegistry {
    pub fn builder() -> EvaluatorRegistryBuilder {
        EvaluatorRegistryBuilder::default()
    }

    /// Build every configured evaluator through `providers`.
    pub fn from_config(config: &RuntimeConfig, providers: &ProviderRegistry) -> Result<Self, ConfigError> {
        let mut builder = Self::builder();
        for evaluator in &config.evaluators {
            let provider = providers
                .create(&evaluator.provider, &evaluator.provider_config)
                .map_err(|source| ConfigError::Provider {
                    evaluator: evaluator.name.clone(),
                    source,
                })?;
            let backend = LlmEvaluator::from_config(evaluator, provider, config.retry.clone());
            builder = builder.register(Arc::new(backend), evaluator.weight);
        }
        if let Some(name) = &config.arbiter {
            builder = builder.arbiter(name.clone());
        }
        if let Some(name) = &config.extractor {
            builder = builder.extractor(name.clone());
        }
        builder.build()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn EvaluatorBackend>> {
        self.backends.get(name)
    }

    /// First evaluator in priority order.
    pub fn primary(&self) -> Option<&Arc<dyn EvaluatorBackend>> {
        self.priority.first().and_then(|name| self.backends.get(name))
    }

    pub fn priority(&self) -> &[String] {
        &self.priority
    }

    pub fn weights(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }

    /// Up to `count` evaluators after the primary, in priority order.
    pub fn additional(&self, count: usize) -> Vec<Arc<dyn EvaluatorBackend>> {
        self.priority
            .iter()
            .skip(1)
            .take(count)
            .filter_map(|name| self.backends.get(name).cloned())
            .collect()
    }

    /// The designated arbiter, if any.
    pub fn arbiter(&self) -> Option<(&Arc<dyn EvaluatorBackend>, &dyn Arbiter)> {
        let backend = self.backends.get(self.arbiter.as_deref()?)?;
        Some((backend, backend.as_arbiter()?))
    }

    /// The designated extractor, if any.
    pub fn extractor(&self) -> Option<(&Arc<dyn EvaluatorBackend>, &dyn Extractor)> {
        let backend = self.backends.get(self.extractor.as_deref()?)?;
        Some((backend, backend.as_extractor()?))
    }

    pub fn len(&self) -> usize {
        self.priority.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priority.is_empty()
    }
}

impl std::fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorRegistry")
            .field("priority", &self.priority)
            .field("weights", &self.weights)
            .field("arbiter", &self.arbiter)
            .field("extractor", &self.extractor)
            .finish()
    }
}

#[derive(Default)]
pub struct EvaluatorRegistryBuilder {
    entries: Vec<(Arc<dyn EvaluatorBackend>, f64)>,
    arbiter: Option<String>,
    extractor: Option<String>,
}

impl EvaluatorRegistryBuilder {
    /// Add a backend with its aggregation weight. Order is priority.
    pub fn register(mut self, backend: Arc<dyn EvaluatorBackend>, weight: f64) -> Self {
        self.entries.push((backend, weight));
        self
    }

    pub fn arbiter(mut self, name: impl Into<String>) -> Self {
        self.arbiter = Some(name.into());
        self
    }

    pub fn extractor(mut self, name: impl Into<String>) -> Self {
        self.extractor = Some(name.into());
        self
    }

    pub fn build(self) -> Result<EvaluatorRegistry, ConfigError> {
        let mut backends = BTreeMap::new();
        let mut priority = Vec::new();
        let mut weights = BTreeMap::new();

        for (backend, weight) in self.entries {
            let name = backend.name().to_string();
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "evaluator '{}' has invalid weight {}",
                    name, weight
                )));
            }
            if backends.contains_key(&name) {
                return Err(ConfigError::Invalid(format!("duplicate evaluator name '{}'", name)));
            }
            weights.insert(name.clone(), weight);
            priority.push(name.clone());
            backends.insert(name, backend);
        }

        if let Some(name) = &self.arbiter {
            let backend = backends.get(name).ok_or_else(|| ConfigError::UnknownEvaluator {
                name: name.clone(),
                role: "arbiter",
            })?;
            if backend.as_arbiter().is_none() {
                return Err(ConfigError::MissingCapability {
                    name: name.clone(),
                    capability: "an arbiter",
                });
            }
        }

        if let Some(name) = &self.extractor {
            let backend = backends.get(name).ok_or_else(|| ConfigError::UnknownEvaluator {
                name: name.clone(),
                role: "extractor",
            })?;
            if backend.as_extractor().is_none() {
                return Err(ConfigError::MissingCapability {
                    name: name.clone(),
                    capability: "an extractor",
                });
            }
        }

        Ok(EvaluatorRegistry {
            backends,
            priority,
            weights,
            arbiter: self.arbiter,
            extractor: self.extractor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedEvaluator, Script};

    fn scripted(name: &str) -> Arc<ScriptedEvaluator> {
        Arc::new(ScriptedEvaluator::new(name, Script::Fail("unused".to_string())))
    }

    #[test]
    fn test_priority_and_weights() {
        let registry = EvaluatorRegistry::builder()
            .register(scripted("primary"), 0.55)
            .register(scripted("second"), 0.30)
            .register(scripted("third"), 0.15)
            .build()
            .unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.primary().unwrap().name(), "primary");
        assert_eq!(registry.priority(), ["primary", "second", "third"]);
        assert_eq!(registry.weights()["second"], 0.30);

        let additional: Vec<String> = registry.additional(1).iter().map(|b| b.name().to_string()).collect();
        assert_eq!(additional, vec!["second"]);
        assert_eq!(registry.additional(10).len(), 2);
    }

    #[test]
    fn test_arbiter_capability_is_checked() {
        let err = EvaluatorRegistry::builder()
            .register(scripted("primary"), 1.0)
            .arbiter("primary")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingCapability { .. }));

        let registry = EvaluatorRegistry::builder()
            .register(scripted("primary"), 1.0)
            .register(Arc::new(ScriptedEvaluator::new("judge", Script::Fail("unused".to_string())).with_arbiter(Script::Fail("unused".to_string()))), 0.0)
            .arbiter("judge")
            .build()
            .unwrap();
        assert_eq!(registry.arbiter().map(|(b, _)| b.name()), Some("judge"));
        assert!(registry.extractor().is_none());
    }

    #[test]
    fn test_unknown_role_and_duplicates() {
        assert!(matches!(
            EvaluatorRegistry::builder()
                .register(scripted("primary"), 1.0)
                .extractor("ocr")
                .build(),
            Err(ConfigError::UnknownEvaluator { .. })
        ));
        assert!(matches!(
            EvaluatorRegistry::builder()
                .register(scripted("primary"), 1.0)
                .register(scripted("primary"), 1.0)
                .build(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_from_config_reports_provider_errors() {
        let config = RuntimeConfig::from_yaml(
            r#"
evaluators:
  - name: primary
    provider: nowhere
    model: m
"#,
        )
        .unwrap();
        match EvaluatorRegistry::from_config(&config, &ProviderRegistry::new()) {
            Err(ConfigError::Provider { evaluator, .. }) => assert_eq!(evaluator, "primary"),
            other => panic!("expected Provider error, got {:?}", other),
        }
    }
}
