//! The decision a request produces, with its trace, accounting and audit
//! snapshot.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tribunal_core::{ConsensusLevel, ConsensusMetrics, Disagreement, EvaluationResult, Mode, Recommendation};
use uuid::Uuid;

use crate::arbitration::ArbitrationOutcome;
use crate::compliance::MaskingLevel;
use crate::evaluators::EvaluatorInvocation;
use crate::resilience::Usage;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Compliance,
    CacheLookup,
    Extraction,
    Prefilter,
    Pack,
    PrimaryEvaluate,
    Escalate,
    AdditionalEvaluate,
    Aggregate,
    Arbitrate,
    Finalize,
    CacheStore,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Compliance => "compliance",
            Stage::CacheLookup => "cache_lookup",
            Stage::Extraction => "extraction",
            Stage::Prefilter => "prefilter",
            Stage::Pack => "pack",
            Stage::PrimaryEvaluate => "primary_evaluate",
            Stage::Escalate => "escalate",
            Stage::AdditionalEvaluate => "additional_evaluate",
            Stage::Aggregate => "aggregate",
            Stage::Arbitrate => "arbitrate",
            Stage::Finalize => "finalize",
            Stage::CacheStore => "cache_store",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceTimings {
    pub stages_ms: BTreeMap<Stage, f64>,
    pub total_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CostBreakdown {
    pub total: Usage,
    pub by_stage: BTreeMap<Stage, Usage>,
    pub by_evaluator: BTreeMap<String, Usage>,
}

/// Kind of a failure the pipeline absorbed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Evaluator,
    Arbitration,
    Cache,
    Budget,
}

/// A soft failure recorded instead of failing the request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: FailureKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<String>,

    pub message: String,
}

impl StageFailure {
    pub fn new(stage: Stage, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            evaluator: None,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebugTrace {
    pub mode: Mode,

    /// Every evaluator that was called, in call order
    pub evaluators_used: Vec<String>,

    pub aggregation_method: String,

    /// Weights applied to the surviving evaluators
    #[serde(default)]
    pub applied_weights: BTreeMap<String, f64>,

    #[serde(default)]
    pub disagreements: Vec<Disagreement>,

    #[serde(default)]
    pub escalation_reasons: Vec<String>,

    /// Set when the prefilter rejected the record and no evaluator ran
    pub early_exit: bool,

    #[serde(default)]
    pub prefilter_flags: BTreeMap<String, f64>,

    #[serde(default)]
    pub prefilter_reasons: Vec<String>,

    /// Whether evaluators received a packed subset of the record
    pub packed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f64>,

    #[serde(default)]
    pub stage_failures: Vec<StageFailure>,
}

impl DebugTrace {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            evaluators_used: Vec::new(),
            aggregation_method: tribunal_core::AGGREGATION_METHOD.to_string(),
            applied_weights: BTreeMap::new(),
            disagreements: Vec::new(),
            escalation_reasons: Vec::new(),
            early_exit: false,
            prefilter_flags: BTreeMap::new(),
            prefilter_reasons: Vec::new(),
            packed: false,
            compression_ratio: None,
            stage_failures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsentOutcome {
    Granted,
    /// Consent checks are disabled by configuration
    NotRequired,
}

/// Retainable record of how a decision was produced.
///
/// Holds hashes and identities only, never record or job content, so it is
/// safe to export whatever the masking level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditSnapshot {
    pub engine: String,
    pub engine_version: String,
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,

    /// Request that originally computed a decision served from cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_request_id: Option<Uuid>,

    pub job_title: String,
    pub job_hash: String,
    pub mode: Mode,
    pub masking: MaskingLevel,
    pub consent: ConsentOutcome,
    pub invocations: Vec<EvaluatorInvocation>,
    pub consensus_level: ConsensusLevel,
    pub arbitration_ran: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arbitration_reason: Option<String>,

    pub total_cost_usd: f64,
    pub total_ms: f64,
    pub stages_ms: BTreeMap<Stage, f64>,

    #[serde(default)]
    pub served_from_cache: bool,
}

/// Final output of one request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedDecision {
    pub final_decision: EvaluationResult,

    /// Raw result per invoked evaluator; `None` for failed calls
    pub evaluator_results: BTreeMap<String, Option<EvaluationResult>>,

    pub consensus: ConsensusMetrics,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arbitration: Option<ArbitrationOutcome>,

    pub debug: DebugTrace,
    pub performance: PerformanceTimings,
    pub cost: CostBreakdown,
    pub audit: AuditSnapshot,

    #[serde(skip)]
    served_from_cache: bool,
}

impl AggregatedDecision {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        final_decision: EvaluationResult,
        evaluator_results: BTreeMap<String, Option<EvaluationResult>>,
        consensus: ConsensusMetrics,
        arbitration: Option<ArbitrationOutcome>,
        debug: DebugTrace,
        performance: PerformanceTimings,
        cost: CostBreakdown,
        audit: AuditSnapshot,
    ) -> Self {
        Self {
            final_decision,
            evaluator_results,
            consensus,
            arbitration,
            debug,
            performance,
            cost,
            audit,
            served_from_cache: false,
        }
    }

    pub fn recommendation(&self) -> Recommendation {
        self.final_decision.recommendation
    }

    pub fn is_served_from_cache(&self) -> bool {
        self.served_from_cache
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Re-issue a cached decision for a new request.
    ///
    /// The verdict, consensus, evaluator calls and cost are those of the
    /// request that computed it; identity and timings are this request's.
    pub(crate) fn reissue(mut self, request_id: Uuid, timestamp: DateTime<Utc>, performance: PerformanceTimings) -> Self {
        let source = self.audit.request_id;
        self.audit.source_request_id = Some(self.audit.source_request_id.unwrap_or(source));
        self.audit.request_id = request_id;
        self.audit.timestamp = timestamp;
        self.audit.total_ms = performance.total_ms;
        self.audit.stages_ms = performance.stages_ms.clone();
        self.audit.served_from_cache = true;
        self.performance = performance;
        self.served_from_cache = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_result;

    fn decision() -> AggregatedDecision {
        let result = sample_result(82.0, Recommendation::Shortlist);
        let mut results = BTreeMap::new();
        results.insert("primary".to_string(), Some(result.clone()));
        results.insert("second".to_string(), None);

        let mut stages_ms = BTreeMap::new();
        stages_ms.insert(Stage::PrimaryEvaluate, 120.5);
        AggregatedDecision::new(
            result,
            results,
            ConsensusMetrics::none(),
            None,
            DebugTrace::new(Mode::Balanced),
            PerformanceTimings {
                stages_ms: stages_ms.clone(),
                total_ms: 130.25,
            },
            CostBreakdown::default(),
            AuditSnapshot {
                engine: tribunal_core::ENGINE_NAME.to_string(),
                engine_version: tribunal_core::ENGINE_VERSION.to_string(),
                request_id: Uuid::new_v4(),
                timestamp: Utc::now(),
                source_request_id: None,
                job_title: "Backend Engineer".to_string(),
                job_hash: "sha256:abc".to_string(),
                mode: Mode::Balanced,
                masking: MaskingLevel::Partial,
                consent: ConsentOutcome::Granted,
                invocations: Vec::new(),
                consensus_level: ConsensusLevel::Strong,
                arbitration_ran: false,
                arbitration_reason: None,
                total_cost_usd: 0.0,
                total_ms: 130.25,
                stages_ms,
                served_from_cache: false,
            },
        )
    }

    #[test]
    fn test_stage_names_match_serde() {
        for stage in [Stage::CacheLookup, Stage::AdditionalEvaluate, Stage::CacheStore] {
            assert_eq!(serde_json::to_value(stage).unwrap(), stage.as_str());
        }
        assert!(Stage::Prefilter < Stage::Pack);
        assert!(Stage::Aggregate < Stage::Arbitrate);
    }

    #[test]
    fn test_json_is_byte_stable() {
        let original = decision();
        let json = original.to_json().unwrap();
        let restored = AggregatedDecision::from_json(&json).unwrap();

        assert_eq!(restored, original);
        assert_eq!(restored.to_json().unwrap(), json);
        assert!(json.contains("\"primary_evaluate\":120.5"));
        assert!(json.contains("\"second\":null"));
    }

    #[test]
    fn test_reissue_keeps_verdict_and_source() {
        let original = decision();
        let first_id = original.audit.request_id;
        let fresh = Uuid::new_v4();

        let reissued = original.clone().reissue(fresh, Utc::now(), PerformanceTimings::default());
        assert!(reissued.is_served_from_cache());
        assert!(reissued.audit.served_from_cache);
        assert_eq!(reissued.final_decision, original.final_decision);
        assert_eq!(reissued.consensus, original.consensus);
        assert_eq!(reissued.audit.request_id, fresh);
        assert_eq!(reissued.audit.source_request_id, Some(first_id));
        assert_eq!(reissued.performance.total_ms, 0.0);

        // A second reissue still points at the request that computed it
        let again = reissued.reissue(Uuid::new_v4(), Utc::now(), PerformanceTimings::default());
        assert_eq!(again.audit.source_request_id, Some(first_id));
    }
}
