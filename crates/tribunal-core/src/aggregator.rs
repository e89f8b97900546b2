//! Multi-evaluator aggregation.
//!
//! Combines the surviving evaluator results into one weighted result and
//! measures how much the evaluators agreed.
//!
//! ## Rules
//!
//! | Field | Combination |
//! |-------|-------------|
//! | `meets_all_mandatory` | AND |
//! | `failed_rules` | union, first occurrence per rule id |
//! | subscores, `overall_score` | weighted mean, weights renormalized over survivors |
//! | `recommendation` | `reject` on any critical failure, else the highest present |
//! | months by category | rounded arithmetic mean |
//! | `by_experience` | taken from the reference evaluator |
//! | strengths, improvements | union, de-duplicated by normalized text |
//!
//! Failed evaluators (`None`) never contribute, and the weight table is only
//! ever divided by the weights of evaluators actually present.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::evaluation::{EvaluationResult, FailedRule, MonthsByCategory, Point, Recommendation};
use crate::job::JobSpecification;

/// Name of the combination method recorded in traces.
pub const AGGREGATION_METHOD: &str = "renormalized_weighted_mean";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("No surviving evaluator results to aggregate (failed: {})", .failed.join(", "))]
    NoSurvivors { failed: Vec<String> },
}

/// Agreement level across evaluators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusLevel {
    Strong,
    Moderate,
    Weak,
    /// No evaluator ran
    None,
}

impl ConsensusLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusLevel::Strong => "strong",
            ConsensusLevel::Moderate => "moderate",
            ConsensusLevel::Weak => "weak",
            ConsensusLevel::None => "none",
        }
    }
}

/// Consensus thresholds and disagreement tolerance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatorConfig {
    #[serde(default = "default_strong_max_delta")]
    pub strong_max_delta: f64,

    #[serde(default = "default_moderate_max_delta")]
    pub moderate_max_delta: f64,

    #[serde(default = "default_moderate_min_agreement")]
    pub moderate_min_agreement: f64,

    /// Score gap beyond which a disagreement is recorded
    #[serde(default = "default_score_tolerance")]
    pub score_tolerance: f64,
}

fn default_strong_max_delta() -> f64 {
    10.0
}

fn default_moderate_max_delta() -> f64 {
    20.0
}

fn default_moderate_min_agreement() -> f64 {
    0.66
}

fn default_score_tolerance() -> f64 {
    10.0
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            strong_max_delta: default_strong_max_delta(),
            moderate_max_delta: default_moderate_max_delta(),
            moderate_min_agreement: default_moderate_min_agreement(),
            score_tolerance: default_score_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusMetrics {
    pub level: ConsensusLevel,
    pub delta_overall_score: f64,
    pub subscore_deltas: BTreeMap<String, f64>,
    pub agreement_rate: f64,
    pub disagreement_count: usize,

    #[serde(default)]
    pub majority_recommendation: Option<Recommendation>,

    #[serde(default)]
    pub evaluator_count: usize,
}

impl ConsensusMetrics {
    /// Metrics for a decision no evaluator took part in.
    pub fn none() -> Self {
        Self {
            level: ConsensusLevel::None,
            delta_overall_score: 0.0,
            subscore_deltas: BTreeMap::new(),
            agreement_rate: 0.0,
            disagreement_count: 0,
            majority_recommendation: None,
            evaluator_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DisagreementSeverity {
    Minor,
    Moderate,
    Major,
}

/// Evaluators disagreeing on one field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Disagreement {
    pub field: String,
    pub values: BTreeMap<String, Value>,
    pub severity: DisagreementSeverity,
}

/// Output of [`Aggregator::aggregate`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Aggregation {
    pub result: EvaluationResult,
    pub consensus: ConsensusMetrics,
    pub disagreements: Vec<Disagreement>,

    /// Weights actually applied, summing to 1
    pub weights: BTreeMap<String, f64>,

    /// Evaluator whose per-experience detail was kept
    pub reference_evaluator: String,
}

/// Value of a comparable field of a result, by its disagreement field name.
pub fn field_value(result: &EvaluationResult, field: &str) -> Option<Value> {
    match field {
        "overall_score" => Some(Value::from(result.overall_score)),
        "recommendation" => Some(Value::from(result.recommendation.as_str())),
        "meets_all_mandatory" => Some(Value::from(result.meets_all_mandatory)),
        _ => result
            .subscores
            .named()
            .into_iter()
            .find(|(name, _)| *name == field)
            .map(|(_, v)| Value::from(v)),
    }
}

/// Re-normalize `weights` over `present` evaluators.
///
/// Missing or non-positive weights count as zero. When no present evaluator
/// carries weight, all present evaluators are weighted equally.
pub fn renormalize(present: &[&str], weights: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let raw: Vec<f64> = present
        .iter()
        .map(|name| {
            weights
                .get(*name)
                .copied()
                .filter(|w| w.is_finite() && *w > 0.0)
                .unwrap_or(0.0)
        })
        .collect();
    let total: f64 = raw.iter().sum();

    present
        .iter()
        .zip(raw)
        .map(|(name, w)| {
            let normalized = if total > 0.0 {
                w / total
            } else {
                1.0 / present.len() as f64
            };
            (name.to_string(), normalized)
        })
        .collect()
}

/// The aggregator.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Aggregate per-evaluator results.
    ///
    /// `priority` orders evaluators for first-occurrence rules and picks the
    /// reference evaluator; evaluators not listed follow in name order.
    pub fn aggregate(
        &self,
        results: &BTreeMap<String, Option<EvaluationResult>>,
        priority: &[String],
        weights: &BTreeMap<String, f64>,
        job: &JobSpecification,
    ) -> Result<Aggregation, AggregationError> {
        let survivors = ordered_survivors(results, priority);
        if survivors.is_empty() {
            return Err(AggregationError::NoSurvivors {
                failed: results.keys().cloned().collect(),
            });
        }

        let names: Vec<&str> = survivors.iter().map(|(n, _)| *n).collect();
        let applied = renormalize(&names, weights);
        let reference = names[0].to_string();

        let result = if survivors.len() == 1 {
            let mut only = survivors[0].1.clone();
            if only.has_critical_failure(job) {
                only.recommendation = Recommendation::Reject;
            }
            only
        } else {
            combine(&survivors, &applied, job)
        };

        let disagreements = self.disagreements(&survivors);
        let consensus = self.consensus(&survivors, disagreements.len());

        Ok(Aggregation {
            result,
            consensus,
            disagreements,
            weights: applied,
            reference_evaluator: reference,
        })
    }

    /// Consensus metrics over surviving results.
    pub fn consensus(
        &self,
        survivors: &[(&str, &EvaluationResult)],
        disagreement_count: usize,
    ) -> ConsensusMetrics {
        let n = survivors.len();
        if n == 0 {
            return ConsensusMetrics::none();
        }

        let mut counts: BTreeMap<Recommendation, usize> = BTreeMap::new();
        for (_, r) in survivors {
            *counts.entry(r.recommendation).or_default() += 1;
        }
        // Highest count; ties go to the higher recommendation
        let (majority, count) = counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0)))
            .map(|(r, c)| (*r, *c))
            .unwrap_or((Recommendation::Reject, 0));
        let agreement_rate = count as f64 / n as f64;

        let delta = spread(survivors.iter().map(|(_, r)| r.overall_score));
        let subscore_deltas = (0..3)
            .map(|i| {
                let name = survivors[0].1.subscores.named()[i].0;
                (
                    name.trim_start_matches("subscores.").to_string(),
                    spread(survivors.iter().map(|(_, r)| r.subscores.named()[i].1)),
                )
            })
            .collect();

        let level = if agreement_rate >= 1.0 && delta <= self.config.strong_max_delta {
            ConsensusLevel::Strong
        } else if agreement_rate >= self.config.moderate_min_agreement
            && delta <= self.config.moderate_max_delta
        {
            ConsensusLevel::Moderate
        } else {
            ConsensusLevel::Weak
        };

        ConsensusMetrics {
            level,
            delta_overall_score: delta,
            subscore_deltas,
            agreement_rate,
            disagreement_count,
            majority_recommendation: Some(majority),
            evaluator_count: n,
        }
    }

    /// Fields on which surviving evaluators differ beyond tolerance.
    pub fn disagreements(&self, survivors: &[(&str, &EvaluationResult)]) -> Vec<Disagreement> {
        if survivors.len() < 2 {
            return Vec::new();
        }
        let mut out = Vec::new();

        let mut score_fields: Vec<(&'static str, Vec<f64>)> = vec![(
            "overall_score",
            survivors.iter().map(|(_, r)| r.overall_score).collect(),
        )];
        for i in 0..3 {
            score_fields.push((
                survivors[0].1.subscores.named()[i].0,
                survivors.iter().map(|(_, r)| r.subscores.named()[i].1).collect(),
            ));
        }
        for (field, values) in score_fields {
            let gap = spread(values.iter().copied());
            if gap > self.config.score_tolerance {
                let severity = if gap > 30.0 {
                    DisagreementSeverity::Major
                } else if gap > 20.0 {
                    DisagreementSeverity::Moderate
                } else {
                    DisagreementSeverity::Minor
                };
                out.push(Disagreement {
                    field: field.to_string(),
                    values: survivors
                        .iter()
                        .zip(values)
                        .map(|((name, _), v)| (name.to_string(), Value::from(v)))
                        .collect(),
                    severity,
                });
            }
        }

        let recommendations: BTreeSet<Recommendation> =
            survivors.iter().map(|(_, r)| r.recommendation).collect();
        if recommendations.len() > 1 {
            let severity = if recommendations.contains(&Recommendation::Shortlist)
                && recommendations.contains(&Recommendation::Reject)
            {
                DisagreementSeverity::Major
            } else {
                DisagreementSeverity::Moderate
            };
            out.push(Disagreement {
                field: "recommendation".to_string(),
                values: collect_values(survivors, "recommendation"),
                severity,
            });
        }

        let mandatory: BTreeSet<bool> = survivors.iter().map(|(_, r)| r.meets_all_mandatory).collect();
        if mandatory.len() > 1 {
            out.push(Disagreement {
                field: "meets_all_mandatory".to_string(),
                values: collect_values(survivors, "meets_all_mandatory"),
                severity: DisagreementSeverity::Major,
            });
        }

        out
    }
}

/// Surviving results in priority order, unlisted evaluators after in name order.
pub fn ordered_survivors<'a>(
    results: &'a BTreeMap<String, Option<EvaluationResult>>,
    priority: &[String],
) -> Vec<(&'a str, &'a EvaluationResult)> {
    let mut ordered: Vec<(&str, &EvaluationResult)> = Vec::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let listed = priority.iter().filter_map(|p| results.get_key_value(p));
    for (name, result) in listed.chain(results.iter()) {
        if !seen.insert(name.as_str()) {
            continue;
        }
        if let Some(result) = result {
            ordered.push((name.as_str(), result));
        }
    }
    ordered
}

fn combine(
    survivors: &[(&str, &EvaluationResult)],
    weights: &BTreeMap<String, f64>,
    job: &JobSpecification,
) -> EvaluationResult {
    let weight = |name: &str| weights.get(name).copied().unwrap_or(0.0);
    let weighted = |f: &dyn Fn(&EvaluationResult) -> f64| -> f64 {
        survivors.iter().map(|(n, r)| weight(n) * f(r)).sum::<f64>().clamp(0.0, 100.0)
    };

    let meets_all_mandatory = survivors.iter().all(|(_, r)| r.meets_all_mandatory);

    let mut rule_ids = BTreeSet::new();
    let failed_rules: Vec<FailedRule> = survivors
        .iter()
        .flat_map(|(_, r)| r.failed_rules.iter())
        .filter(|rule| rule_ids.insert(rule.rule_id.clone()))
        .cloned()
        .collect();

    let mut subscores = survivors[0].1.subscores.clone();
    subscores.experience = weighted(&|r: &EvaluationResult| r.subscores.experience);
    subscores.skills_match = weighted(&|r: &EvaluationResult| r.subscores.skills_match);
    subscores.nice_to_have = weighted(&|r: &EvaluationResult| r.subscores.nice_to_have);
    subscores.experience_years = weighted_optional(survivors, weights, |r| r.subscores.experience_years);

    let overall_score = weighted(&|r: &EvaluationResult| r.overall_score);

    let critical = survivors.iter().any(|(_, r)| r.has_critical_failure(job));
    let recommendation = if critical {
        Recommendation::Reject
    } else {
        survivors
            .iter()
            .map(|(_, r)| r.recommendation)
            .max()
            .unwrap_or(Recommendation::Reject)
    };

    let n = survivors.len() as f64;
    let mean = |f: &dyn Fn(&MonthsByCategory) -> u32| -> u32 {
        let total: f64 = survivors
            .iter()
            .map(|(_, r)| f(&r.relevance_summary.months) as f64)
            .sum();
        (total / n).round() as u32
    };
    let mut relevance_summary = survivors[0].1.relevance_summary.clone();
    relevance_summary.months = MonthsByCategory {
        direct: mean(&|m: &MonthsByCategory| m.direct),
        adjacent: mean(&|m: &MonthsByCategory| m.adjacent),
        peripheral: mean(&|m: &MonthsByCategory| m.peripheral),
        irrelevant: mean(&|m: &MonthsByCategory| m.irrelevant),
    };

    EvaluationResult {
        meets_all_mandatory,
        failed_rules,
        relevance_summary,
        subscores,
        overall_score,
        recommendation,
        strengths: union_points(survivors.iter().map(|(_, r)| r.strengths.as_slice())),
        improvements: union_points(survivors.iter().map(|(_, r)| r.improvements.as_slice())),
    }
}

/// Weighted mean over the survivors that report a value, renormalized among them.
fn weighted_optional(
    survivors: &[(&str, &EvaluationResult)],
    weights: &BTreeMap<String, f64>,
    f: impl Fn(&EvaluationResult) -> Option<f64>,
) -> Option<f64> {
    let reporting: Vec<(&str, f64)> = survivors
        .iter()
        .filter_map(|(n, r)| f(r).map(|v| (*n, v)))
        .collect();
    if reporting.is_empty() {
        return None;
    }
    let names: Vec<&str> = reporting.iter().map(|(n, _)| *n).collect();
    let local = renormalize(&names, weights);
    Some(
        reporting
            .iter()
            .map(|(n, v)| local.get(*n).copied().unwrap_or(0.0) * v)
            .sum(),
    )
}

fn union_points<'a>(lists: impl Iterator<Item = &'a [Point]>) -> Vec<Point> {
    let mut seen = BTreeSet::new();
    lists
        .flatten()
        .filter(|p| seen.insert(p.normalized_key()))
        .cloned()
        .collect()
}

fn collect_values(survivors: &[(&str, &EvaluationResult)], field: &str) -> BTreeMap<String, Value> {
    survivors
        .iter()
        .filter_map(|(n, r)| field_value(r, field).map(|v| (n.to_string(), v)))
        .collect()
}

fn spread(values: impl Iterator<Item = f64>) -> f64 {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if min.is_finite() && max.is_finite() {
        max - min
    } else {
        0.0
    }
}
