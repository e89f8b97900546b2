//! # tribunal-core
//!
//! Deterministic building blocks of the evaluator ensemble.
//!
//! This crate never performs I/O. It answers:
//! - Is this candidate manifestly out of scope? ([`Prefilter`])
//! - What part of the record should evaluators see? ([`ContextPacker`])
//! - Should more evaluators be consulted? ([`EscalationPolicy`])
//! - What do the evaluators say together? ([`Aggregator`])
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same input always produces same output
//! 2. **No evaluator calls**: Everything here is pure computation
//! 3. **Traceable**: Evidence cites a literal quote and a path into the record
//! 4. **Renormalized**: Weights are only ever divided over evaluators present
//!
//! ## Example
//!
//! ```rust,ignore
//! use tribunal_core::{Aggregator, JobSpecification, Prefilter};
//!
//! let job = JobSpecification::from_file("job.yaml")?;
//! let verdict = Prefilter::default().run(&record, &job);
//! if verdict.pass {
//!     let agg = Aggregator::default().aggregate(&results, &priority, &weights, &job)?;
//!     println!("{:?} ({:?})", agg.result.recommendation, agg.consensus.level);
//! }
//! ```

pub mod aggregator;
pub mod escalation;
pub mod evaluation;
pub mod evidence;
pub mod hashing;
pub mod job;
pub mod mode;
pub mod packer;
pub mod prefilter;
pub mod record;
pub mod terms;

// Re-export main types at crate root
pub use aggregator::{
    Aggregation, AggregationError, Aggregator, AggregatorConfig, ConsensusLevel,
    ConsensusMetrics, Disagreement, DisagreementSeverity, AGGREGATION_METHOD,
};
pub use escalation::{EscalationConfig, EscalationDecision, EscalationPolicy, Trigger};
pub use evaluation::{
    parse_result, parse_result_str, validate_result, EvaluationResult, FailedRule, Point,
    Recommendation, RelevanceCategory, Subscores, ValidationError,
};
pub use evidence::Evidence;
pub use job::{JobError, JobSpecification, MandatoryRule, RuleSeverity};
pub use mode::{Mode, ModePolicy, ModePresets};
pub use packer::{ContextPacker, EvaluatorInput, PackedContext, PackerConfig};
pub use prefilter::{Prefilter, PrefilterConfig, PrefilterVerdict};
pub use record::{CandidateRecord, RecordError, YearMonth};

/// Engine identity recorded in audit snapshots.
pub const ENGINE_NAME: &str = "tribunal";

/// Engine version recorded in audit snapshots.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const JOB_YAML: &str = r#"
title: "Backend Engineer"
mandatory_rules:
  - id: "M1"
    description: "Rust in production"
    severity: critical
required_skills: ["Rust"]
keywords:
  direct: ["rust"]
  adjacent: ["go"]
thresholds:
  years_for_full_score: 5
  shortlist_min: 80
  consider_min: 60
analysis_date: "2025-06-01"
"#;

    const RECORD_JSON: &str = r#"{
  "identity": { "subject_id": "c-42", "headline": "Rust engineer" },
  "experiences": [
    { "title": "Rust Engineer", "employer": "Acme", "start": "2019-03",
      "missions": ["Ran Rust services in production"] }
  ],
  "skills": ["Rust", "Go"]
}"#;

    const RESULT_JSON: &str = r#"{
  "meets_all_mandatory": true,
  "failed_rules": [],
  "relevance_summary": {
    "months": { "direct": 76 },
    "by_experience": [
      { "experience_index": 0, "title": "Rust Engineer", "category": "direct",
        "evidence": [{ "quote": "Rust services in production", "path": "experiences[0].missions[0]" }] }
    ]
  },
  "subscores": { "experience": 100, "skills_match": 90, "nice_to_have": 40 },
  "overall_score": 75,
  "recommendation": "consider",
  "strengths": [
    { "point": "Production Rust", "evidence": [
      { "quote": "Rust", "path": "skills[0]" },
      { "quote": "Rust engineer", "path": "identity.headline" }
    ] }
  ]
}"#;

    #[test]
    fn test_single_evaluator_flow() {
        let job = JobSpecification::from_yaml(JOB_YAML).unwrap();
        let record = CandidateRecord::from_json(RECORD_JSON).unwrap();

        let verdict = Prefilter::default().run(&record, &job);
        assert!(verdict.pass);

        let packed = ContextPacker::default().pack(&record, &job);
        assert!(packed.fallback);

        let result = parse_result_str(RESULT_JSON).unwrap();
        for point in &result.strengths {
            for evidence in &point.evidence {
                assert!(evidence.is_grounded(&record), "{:?}", evidence);
            }
        }

        let decision = EscalationPolicy::default().needs_more(
            &result,
            &job,
            ModePresets::default().policy(Mode::Eco),
        );
        assert!(!decision.needs_more);

        let results = BTreeMap::from([("primary".to_string(), Some(result.clone()))]);
        let agg = Aggregator::default()
            .aggregate(&results, &["primary".to_string()], &BTreeMap::new(), &job)
            .unwrap();
        assert_eq!(agg.result, result);
        assert_eq!(agg.result.recommendation, Recommendation::Consider);
        assert_eq!(agg.consensus.level, ConsensusLevel::Strong);
    }
}
