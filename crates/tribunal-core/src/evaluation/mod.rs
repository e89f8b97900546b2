//! Evaluation results produced by evaluator backends.
//!
//! An `EvaluationResult` is immutable once produced. Results arriving as
//! JSON are checked against the embedded schema and then range-checked
//! before the pipeline accepts them; see [`validator`].

mod schema;
mod validator;

pub use schema::{is_valid_result, validate_result_schema};
pub use validator::{parse_result, parse_result_str, validate_result, ValidationError};

use serde::{Deserialize, Serialize};

use crate::evidence::Evidence;

/// Hiring recommendation, totally ordered `Shortlist > Consider > Reject`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Reject,
    Consider,
    Shortlist,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Reject => "reject",
            Recommendation::Consider => "consider",
            Recommendation::Shortlist => "shortlist",
        }
    }
}

/// Relevance of one experience to the job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceCategory {
    Direct,
    Adjacent,
    Peripheral,
    Irrelevant,
}

/// A mandatory rule the candidate failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedRule {
    pub rule_id: String,
    pub reason: String,

    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

/// Months of experience per relevance category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MonthsByCategory {
    #[serde(default)]
    pub direct: u32,
    #[serde(default)]
    pub adjacent: u32,
    #[serde(default)]
    pub peripheral: u32,
    #[serde(default)]
    pub irrelevant: u32,
}

/// Per-experience relevance judgement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperienceRelevance {
    pub experience_index: usize,

    #[serde(default)]
    pub title: String,

    pub category: RelevanceCategory,

    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RelevanceSummary {
    pub months: MonthsByCategory,

    #[serde(default)]
    pub by_experience: Vec<ExperienceRelevance>,
}

/// Subscores normalized to 0..=100.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Subscores {
    pub experience: f64,
    pub skills_match: f64,
    pub nice_to_have: f64,

    /// Relevant years the experience subscore was normalized from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_years: Option<f64>,
}

impl Subscores {
    /// Named subscore values in a fixed order.
    pub fn named(&self) -> [(&'static str, f64); 3] {
        [
            ("subscores.experience", self.experience),
            ("subscores.skills_match", self.skills_match),
            ("subscores.nice_to_have", self.nice_to_have),
        ]
    }
}

/// A strength or improvement with its supporting citations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub point: String,

    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

impl Point {
    pub fn new(point: impl Into<String>) -> Self {
        Self {
            point: point.into(),
            evidence: Vec::new(),
        }
    }

    /// Key used to de-duplicate points across evaluators.
    pub fn normalized_key(&self) -> String {
        self.point
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// The structured opinion of one evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    pub meets_all_mandatory: bool,

    #[serde(default)]
    pub failed_rules: Vec<FailedRule>,

    pub relevance_summary: RelevanceSummary,

    pub subscores: Subscores,

    pub overall_score: f64,

    pub recommendation: Recommendation,

    #[serde(default)]
    pub strengths: Vec<Point>,

    #[serde(default)]
    pub improvements: Vec<Point>,
}

impl EvaluationResult {
    /// Citations across strengths and per-experience relevance judgements.
    pub fn evidence_count(&self) -> usize {
        let strengths: usize = self.strengths.iter().map(|p| p.evidence.len()).sum();
        let relevance: usize = self
            .relevance_summary
            .by_experience
            .iter()
            .map(|e| e.evidence.len())
            .sum();
        strengths + relevance
    }

    /// Whether any failed rule is critical under `job`.
    pub fn has_critical_failure(&self, job: &crate::job::JobSpecification) -> bool {
        self.failed_rules.iter().any(|r| job.is_critical(&r.rule_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommendation_order() {
        assert!(Recommendation::Shortlist > Recommendation::Consider);
        assert!(Recommendation::Consider > Recommendation::Reject);
        assert_eq!(
            [Recommendation::Reject, Recommendation::Shortlist, Recommendation::Consider]
                .into_iter()
                .max(),
            Some(Recommendation::Shortlist)
        );
    }

    #[test]
    fn test_point_normalized_key() {
        let a = Point::new("Strong Rust experience.");
        let b = Point::new("  strong   rust EXPERIENCE ");
        assert_eq!(a.normalized_key(), b.normalized_key());
    }

    #[test]
    fn test_evidence_count() {
        let result = EvaluationResult {
            meets_all_mandatory: true,
            failed_rules: vec![],
            relevance_summary: RelevanceSummary {
                months: MonthsByCategory::default(),
                by_experience: vec![ExperienceRelevance {
                    experience_index: 0,
                    title: "Engineer".to_string(),
                    category: RelevanceCategory::Direct,
                    evidence: vec![Evidence::from_title(0, "Engineer")],
                }],
            },
            subscores: Subscores::default(),
            overall_score: 50.0,
            recommendation: Recommendation::Reject,
            strengths: vec![Point {
                point: "Rust".to_string(),
                evidence: vec![Evidence::from_skill(0, "Rust"), Evidence::from_skill(1, "Tokio")],
            }],
            improvements: vec![Point {
                point: "No cloud".to_string(),
                evidence: vec![Evidence::from_skill(2, "x")],
            }],
        };
        assert_eq!(result.evidence_count(), 3);
    }
}
