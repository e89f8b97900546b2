//! Job specification parsing from YAML/JSON.
//!
//! A job specification is immutable for the life of a request. Only its
//! content hash ever reaches the cache key or the audit snapshot.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evaluation::Recommendation;
use crate::hashing::content_hash;
use crate::record::YearMonth;
use crate::terms::normalize_term;

/// Errors that can occur when loading a job specification.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Failed to read job specification file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Job specification validation failed: {0}")]
    ValidationError(String),
}

/// Severity of a mandatory rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleSeverity {
    /// A failure forces the aggregate recommendation to `reject`
    Critical,
    #[default]
    Standard,
}

/// A mandatory eligibility rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MandatoryRule {
    /// Unique identifier (e.g., "M1")
    pub id: String,

    pub description: String,

    #[serde(default)]
    pub severity: RuleSeverity,
}

/// Keyword sets used to classify experience relevance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct KeywordSets {
    #[serde(default)]
    pub direct: Vec<String>,

    #[serde(default)]
    pub adjacent: Vec<String>,

    #[serde(default)]
    pub peripheral: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringWeights {
    pub experience: f64,
    pub skills: f64,
    pub nice_to_have: f64,

    /// Multiplier applied to adjacent experience when counting relevant years
    pub adjacent_discount: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            experience: 0.5,
            skills: 0.35,
            nice_to_have: 0.15,
            adjacent_discount: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thresholds {
    /// Relevant years at which the experience subscore reaches 100
    pub years_for_full_score: f64,
    pub shortlist_min: f64,
    pub consider_min: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            years_for_full_score: 5.0,
            shortlist_min: 75.0,
            consider_min: 60.0,
        }
    }
}

/// The scoring and eligibility configuration for one vacancy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSpecification {
    pub title: String,

    #[serde(default)]
    pub mandatory_rules: Vec<MandatoryRule>,

    #[serde(default)]
    pub required_skills: Vec<String>,

    #[serde(default)]
    pub nice_to_have_skills: Vec<String>,

    #[serde(default)]
    pub keywords: KeywordSets,

    #[serde(default)]
    pub weights: ScoringWeights,

    #[serde(default)]
    pub thresholds: Thresholds,

    pub analysis_date: NaiveDate,
}

impl JobSpecification {
    /// Parse a job specification from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, JobError> {
        let job: Self = serde_yaml::from_str(yaml)?;
        job.validate()?;
        Ok(job)
    }

    /// Parse a job specification from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, JobError> {
        let job: Self = serde_json::from_str(json)?;
        job.validate()?;
        Ok(job)
    }

    /// Load a job specification from a file, choosing the format by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, JobError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Validate the specification.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.title.trim().is_empty() {
            return Err(JobError::ValidationError("title must not be empty".to_string()));
        }

        let mut seen = BTreeSet::new();
        for rule in &self.mandatory_rules {
            if rule.id.trim().is_empty() {
                return Err(JobError::ValidationError(
                    "mandatory rule id must not be empty".to_string(),
                ));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(JobError::ValidationError(format!(
                    "Duplicate mandatory rule id: {}",
                    rule.id
                )));
            }
        }

        let t = &self.thresholds;
        if !(0.0..=100.0).contains(&t.consider_min) || !(0.0..=100.0).contains(&t.shortlist_min) {
            return Err(JobError::ValidationError(
                "thresholds must lie within 0..=100".to_string(),
            ));
        }
        if t.consider_min > t.shortlist_min {
            return Err(JobError::ValidationError(format!(
                "consider_min ({}) exceeds shortlist_min ({})",
                t.consider_min, t.shortlist_min
            )));
        }
        if t.years_for_full_score <= 0.0 {
            return Err(JobError::ValidationError(
                "years_for_full_score must be positive".to_string(),
            ));
        }

        let w = &self.weights;
        let weights = [w.experience, w.skills, w.nice_to_have];
        if weights.iter().any(|v| !v.is_finite() || *v < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(JobError::ValidationError(
                "scoring weights must be non-negative with a positive sum".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&w.adjacent_discount) {
            return Err(JobError::ValidationError(
                "adjacent_discount must lie within 0..=1".to_string(),
            ));
        }

        Ok(())
    }

    /// Content hash of the specification (never the raw content).
    pub fn content_hash(&self) -> String {
        // Plain structs, Vecs and BTreeSets only, so serialization cannot fail.
        content_hash(self).unwrap_or_else(|_| crate::hashing::sha256_hex(self.title.as_bytes()))
    }

    /// The analysis date at month granularity.
    pub fn analysis_month(&self) -> YearMonth {
        YearMonth::from(self.analysis_date)
    }

    /// Look up a mandatory rule by id.
    pub fn rule(&self, id: &str) -> Option<&MandatoryRule> {
        self.mandatory_rules.iter().find(|r| r.id == id)
    }

    /// Whether the given rule id names a critical rule.
    pub fn is_critical(&self, id: &str) -> bool {
        self.rule(id)
            .map(|r| r.severity == RuleSeverity::Critical)
            .unwrap_or(false)
    }

    /// Normalized union of every keyword set and skill list.
    pub fn combined_keywords(&self) -> BTreeSet<String> {
        self.keywords
            .direct
            .iter()
            .chain(&self.keywords.adjacent)
            .chain(&self.keywords.peripheral)
            .chain(&self.required_skills)
            .chain(&self.nice_to_have_skills)
            .map(|k| normalize_term(k))
            .filter(|k| !k.is_empty())
            .collect()
    }

    /// Map an overall score to a recommendation using the thresholds.
    pub fn recommendation_for(&self, overall_score: f64, meets_all_mandatory: bool) -> Recommendation {
        if !meets_all_mandatory {
            return Recommendation::Reject;
        }
        if overall_score >= self.thresholds.shortlist_min {
            Recommendation::Shortlist
        } else if overall_score >= self.thresholds.consider_min {
            Recommendation::Consider
        } else {
            Recommendation::Reject
        }
    }

    /// Normalize relevant years onto the 0..=100 experience subscore.
    pub fn normalize_experience_years(&self, years: f64) -> f64 {
        (years.max(0.0) / self.thresholds.years_for_full_score).min(1.0) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB_YAML: &str = r#"
title: "Senior Rust Engineer"
mandatory_rules:
  - id: "M1"
    description: "Professional Rust experience"
    severity: critical
  - id: "M2"
    description: "Fluent English"
required_skills: ["Rust", "Tokio"]
nice_to_have_skills: ["Kubernetes"]
keywords:
  direct: ["rust", "systems programming"]
  adjacent: ["c++", "go"]
  peripheral: ["python"]
thresholds:
  years_for_full_score: 6
  shortlist_min: 80
  consider_min: 60
analysis_date: "2025-06-01"
"#;

    #[test]
    fn test_parse_yaml() {
        let job = JobSpecification::from_yaml(JOB_YAML).unwrap();
        assert_eq!(job.title, "Senior Rust Engineer");
        assert_eq!(job.mandatory_rules.len(), 2);
        assert!(job.is_critical("M1"));
        assert!(!job.is_critical("M2"));
        assert!(!job.is_critical("unknown"));
        assert_eq!(job.weights, ScoringWeights::default());
        assert_eq!(job.analysis_month().to_string(), "2025-06");
    }

    #[test]
    fn test_duplicate_rule_ids_rejected() {
        let yaml = JOB_YAML.replace("id: \"M2\"", "id: \"M1\"");
        assert!(matches!(
            JobSpecification::from_yaml(&yaml),
            Err(JobError::ValidationError(_))
        ));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let yaml = JOB_YAML.replace("consider_min: 60", "consider_min: 90");
        assert!(JobSpecification::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_content_hash_changes_with_content() {
        let job = JobSpecification::from_yaml(JOB_YAML).unwrap();
        let mut other = job.clone();
        other.required_skills.push("Axum".to_string());

        assert_eq!(job.content_hash(), job.clone().content_hash());
        assert_ne!(job.content_hash(), other.content_hash());
        assert!(!job.content_hash().contains("Rust"));
    }

    #[test]
    fn test_recommendation_thresholds() {
        let job = JobSpecification::from_yaml(JOB_YAML).unwrap();
        assert_eq!(job.recommendation_for(75.0, true), Recommendation::Consider);
        assert_eq!(job.recommendation_for(80.0, true), Recommendation::Shortlist);
        assert_eq!(job.recommendation_for(59.9, true), Recommendation::Reject);
        assert_eq!(job.recommendation_for(95.0, false), Recommendation::Reject);
    }

    #[test]
    fn test_combined_keywords_normalized() {
        let job = JobSpecification::from_yaml(JOB_YAML).unwrap();
        let keywords = job.combined_keywords();
        assert!(keywords.contains("rust"));
        assert!(keywords.contains("systems programming"));
        assert!(keywords.contains("kubernetes"));
    }

    #[test]
    fn test_normalize_experience_years() {
        let job = JobSpecification::from_yaml(JOB_YAML).unwrap();
        assert_eq!(job.normalize_experience_years(3.0), 50.0);
        assert_eq!(job.normalize_experience_years(12.0), 100.0);
        assert_eq!(job.normalize_experience_years(-1.0), 0.0);
    }
}
