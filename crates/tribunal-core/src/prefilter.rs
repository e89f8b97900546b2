//! Deterministic Prefilter
//!
//! **Question**: Is this candidate manifestly out of scope for the job?
//!
//! Wrongly rejecting a viable candidate costs far more than spending an
//! evaluator call on a weak one, so the prefilter rejects (`pass = false`)
//! only when keyword coverage of the job falls below a floor. Every weaker
//! signal becomes a soft flag with a severity in `0..=1`.
//!
//! ## Signals
//!
//! | Flag | Condition |
//! |------|-----------|
//! | `no_experience` | No experience months at the analysis date |
//! | `short_experience` | Fewer months than `short_experience_months` |
//! | `low_keyword_overlap` | Keyword coverage below `low_overlap` |
//! | `low_skill_coverage` | Required skill coverage below `low_skill_coverage` |
//! | `critical_rule_unsupported:<id>` | No term of a critical rule appears in the record |
//!
//! `confidence = 1 - max(severity)`. No network calls, no allocation beyond
//! the term sets.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::job::{JobSpecification, RuleSeverity};
use crate::record::CandidateRecord;
use crate::terms::{keyword_coverage, keyword_set, tokenize, TermSet};

lazy_static! {
    // Words that appear in rule descriptions without naming what the rule is about
    static ref RULE_FILLER: HashSet<&'static str> = [
        "experience", "experienced", "years", "year", "professional", "minimum", "least",
        "required", "requires", "must", "knowledge", "proficiency", "proficient", "strong",
        "solid", "good", "skills", "skill", "ability", "level", "working", "hands-on",
        "candidate", "demonstrated", "proven", "background", "more", "than", "one", "two",
        "three", "four", "five",
    ]
    .into_iter()
    .collect();
}

pub const FLAG_NO_EXPERIENCE: &str = "no_experience";
pub const FLAG_SHORT_EXPERIENCE: &str = "short_experience";
pub const FLAG_LOW_KEYWORD_OVERLAP: &str = "low_keyword_overlap";
pub const FLAG_LOW_SKILL_COVERAGE: &str = "low_skill_coverage";
pub const FLAG_CRITICAL_RULE_PREFIX: &str = "critical_rule_unsupported:";

/// Prefilter thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrefilterConfig {
    /// Keyword coverage below which the candidate is rejected
    #[serde(default = "default_min_keyword_similarity")]
    pub min_keyword_similarity: f64,

    /// Keyword coverage below which a soft flag is raised
    #[serde(default = "default_low_overlap")]
    pub low_overlap: f64,

    #[serde(default = "default_low_skill_coverage")]
    pub low_skill_coverage: f64,

    #[serde(default = "default_short_experience_months")]
    pub short_experience_months: u32,

    #[serde(default = "default_critical_rule_severity")]
    pub critical_rule_severity: f64,

    /// Produce a reject decision without evaluator calls when `pass = false`
    #[serde(default = "default_true")]
    pub short_circuit_on_reject: bool,
}

fn default_min_keyword_similarity() -> f64 {
    0.05
}

fn default_low_overlap() -> f64 {
    0.2
}

fn default_low_skill_coverage() -> f64 {
    0.5
}

fn default_short_experience_months() -> u32 {
    12
}

fn default_critical_rule_severity() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

impl Default for PrefilterConfig {
    fn default() -> Self {
        Self {
            min_keyword_similarity: default_min_keyword_similarity(),
            low_overlap: default_low_overlap(),
            low_skill_coverage: default_low_skill_coverage(),
            short_experience_months: default_short_experience_months(),
            critical_rule_severity: default_critical_rule_severity(),
            short_circuit_on_reject: true,
        }
    }
}

/// Outcome of the prefilter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrefilterVerdict {
    pub pass: bool,
    pub confidence: f64,
    pub soft_flags: BTreeMap<String, f64>,
    pub reasons: Vec<String>,

    /// Keyword coverage measured, `None` when the job has no keywords
    pub keyword_similarity: Option<f64>,

    #[serde(with = "duration_micros")]
    pub elapsed: Duration,
}

impl PrefilterVerdict {
    /// Highest soft-flag severity, 0 when nothing was flagged.
    pub fn max_severity(&self) -> f64 {
        self.soft_flags.values().copied().fold(0.0, f64::max)
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.soft_flags.contains_key(name)
    }
}

mod duration_micros {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_micros)
    }
}

/// The rule-based pre-screen.
#[derive(Debug, Clone, Default)]
pub struct Prefilter {
    config: PrefilterConfig,
}

impl Prefilter {
    pub fn new(config: PrefilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PrefilterConfig {
        &self.config
    }

    /// Screen `record` against `job`.
    pub fn run(&self, record: &CandidateRecord, job: &JobSpecification) -> PrefilterVerdict {
        let started = Instant::now();
        let mut flags: BTreeMap<String, f64> = BTreeMap::new();
        let mut reasons = Vec::new();

        let terms = TermSet::from_fragments(record.text_fragments());

        self.check_experience(record, job, &mut flags, &mut reasons);

        let keywords = job.combined_keywords();
        let similarity = keyword_coverage(&terms, &keywords);
        let mut pass = true;
        if let Some(coverage) = similarity {
            if coverage < self.config.min_keyword_similarity {
                pass = false;
                reasons.push(format!(
                    "Keyword coverage {:.1}% is below the {:.1}% floor",
                    coverage * 100.0,
                    self.config.min_keyword_similarity * 100.0
                ));
            }
            if coverage < self.config.low_overlap {
                let severity = clamp_unit(1.0 - coverage / self.config.low_overlap);
                flags.insert(FLAG_LOW_KEYWORD_OVERLAP.to_string(), severity);
                reasons.push(format!(
                    "Low keyword overlap ({}/{} job keywords found)",
                    terms.matched(&keywords).len(),
                    keywords.len()
                ));
            }
        }

        let required = keyword_set(&job.required_skills);
        if let Some(coverage) = keyword_coverage(&terms, &required) {
            if coverage < self.config.low_skill_coverage {
                flags.insert(FLAG_LOW_SKILL_COVERAGE.to_string(), clamp_unit(1.0 - coverage));
                let missing: Vec<&str> = required
                    .iter()
                    .filter(|s| !terms.contains_keyword(s))
                    .map(String::as_str)
                    .collect();
                reasons.push(format!("Missing required skills: {}", missing.join(", ")));
            }
        }

        for rule in job
            .mandatory_rules
            .iter()
            .filter(|r| r.severity == RuleSeverity::Critical)
        {
            let content = rule_terms(&rule.description);
            if content.is_empty() {
                continue;
            }
            if !content.iter().any(|t| terms.contains_keyword(t)) {
                flags.insert(
                    format!("{}{}", FLAG_CRITICAL_RULE_PREFIX, rule.id),
                    clamp_unit(self.config.critical_rule_severity),
                );
                reasons.push(format!(
                    "No evidence found for critical rule {}: {}",
                    rule.id, rule.description
                ));
            }
        }

        let max_severity = flags.values().copied().fold(0.0, f64::max);
        PrefilterVerdict {
            pass,
            confidence: 1.0 - max_severity,
            soft_flags: flags,
            reasons,
            keyword_similarity: similarity,
            elapsed: started.elapsed(),
        }
    }

    fn check_experience(
        &self,
        record: &CandidateRecord,
        job: &JobSpecification,
        flags: &mut BTreeMap<String, f64>,
        reasons: &mut Vec<String>,
    ) {
        let months = record.total_experience_months(job.analysis_month());
        let short = self.config.short_experience_months;
        if months == 0 {
            flags.insert(FLAG_NO_EXPERIENCE.to_string(), 0.8);
            reasons.push("No professional experience listed".to_string());
        } else if short > 0 && months < short {
            let severity = 0.5 * (1.0 - months as f64 / short as f64);
            flags.insert(FLAG_SHORT_EXPERIENCE.to_string(), clamp_unit(severity));
            reasons.push(format!("Only {} month(s) of total experience", months));
        }
    }
}

/// Content terms of a rule description, filler words removed.
fn rule_terms(description: &str) -> BTreeSet<String> {
    tokenize(description)
        .into_iter()
        .filter(|t| !RULE_FILLER.contains(t.as_str()) && !t.chars().all(|c| c.is_ascii_digit() || c == '+'))
        .collect()
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
