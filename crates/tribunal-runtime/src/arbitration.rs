//! Arbitration stage.
//!
//! Called by the controller only when the mode arbitrates at the observed
//! consensus level. The arbiter gets the raw results and the job, never the
//! blended aggregate. A failed arbitration is soft: the caller keeps the
//! aggregate it already has.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use tribunal_core::aggregator::field_value;
use tribunal_core::{Disagreement, EvaluationResult, FailedRule, JobSpecification, Recommendation};

use crate::evaluators::{
    arbitrate_with, Arbiter, ArbiterVerdict, ArbitrationRequest, EvaluatorBackend, EvaluatorError,
    EvaluatorInvocation,
};
use crate::resilience::Usage;

/// How the arbiter settled one disputed field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedDisagreement {
    pub field: String,
    pub chosen: Value,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArbitrationOutcome {
    /// Overrides the aggregate
    pub result: EvaluationResult,
    pub justification: String,
    pub resolved: Vec<ResolvedDisagreement>,
    pub elapsed_ms: f64,
    pub usage: Usage,
}

impl ArbitrationOutcome {
    fn from_verdict(verdict: ArbiterVerdict, disagreements: &[Disagreement], elapsed_ms: f64, usage: Usage) -> Self {
        let resolved = disagreements
            .iter()
            .map(|d| ResolvedDisagreement {
                field: d.field.clone(),
                chosen: field_value(&verdict.result, &d.field).unwrap_or(Value::Null),
                reason: verdict
                    .resolutions
                    .get(&d.field)
                    .filter(|r| !r.trim().is_empty())
                    .cloned()
                    .unwrap_or_else(|| verdict.justification.clone()),
            })
            .collect();

        Self {
            result: verdict.result,
            justification: verdict.justification,
            resolved,
            elapsed_ms,
            usage,
        }
    }
}

/// Result of running the stage: the call record plus the outcome or why
/// there is none.
#[derive(Debug)]
pub struct Arbitration {
    pub invocation: EvaluatorInvocation,
    pub outcome: Result<ArbitrationOutcome, EvaluatorError>,
}

/// Ask `arbiter` to settle `disagreements` among `results`.
pub async fn arbitrate(
    backend: &dyn EvaluatorBackend,
    arbiter: &dyn Arbiter,
    results: BTreeMap<String, EvaluationResult>,
    disagreements: &[Disagreement],
    job: Arc<JobSpecification>,
    instruction: Option<Arc<str>>,
    timeout: Duration,
) -> Arbitration {
    let critical = critical_failures(&results, &job);
    let request = ArbitrationRequest {
        results,
        job,
        instruction,
    };
    let invoked = arbitrate_with(backend, arbiter, &request, timeout).await;

    let invocation = invoked.invocation;
    let outcome = match invoked.outcome {
        Ok(mut verdict) => {
            enforce_critical_rules(&mut verdict.result, critical, &request.job);
            Ok(ArbitrationOutcome::from_verdict(
                verdict,
                disagreements,
                invocation.elapsed_ms,
                invocation.usage.clone(),
            ))
        }
        Err(e) => {
            warn!(arbiter = backend.name(), error = %e, "Arbitration failed, keeping aggregate");
            Err(e)
        }
    };

    Arbitration { invocation, outcome }
}

/// Critical failed rules reported by any raw result, first report wins.
fn critical_failures(results: &BTreeMap<String, EvaluationResult>, job: &JobSpecification) -> Vec<FailedRule> {
    let mut failures: Vec<FailedRule> = Vec::new();
    for rule in results.values().flat_map(|r| &r.failed_rules) {
        if job.is_critical(&rule.rule_id) && !failures.iter().any(|f| f.rule_id == rule.rule_id) {
            failures.push(rule.clone());
        }
    }
    failures
}

/// A critical failure seen by the arbiter or any evaluator rejects, whatever
/// the arbiter recommended.
fn enforce_critical_rules(result: &mut EvaluationResult, critical: Vec<FailedRule>, job: &JobSpecification) {
    for rule in critical {
        if !result.failed_rules.iter().any(|f| f.rule_id == rule.rule_id) {
            result.failed_rules.push(rule);
        }
    }
    if result.has_critical_failure(job) {
        if result.recommendation != Recommendation::Reject {
            warn!(
                recommended = result.recommendation.as_str(),
                "Arbiter overlooked a critical rule failure, rejecting"
            );
        }
        result.recommendation = Recommendation::Reject;
        result.meets_all_mandatory = false;
    }
}
