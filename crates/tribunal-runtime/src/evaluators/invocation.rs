//! Bounded, accounted evaluator calls.
//!
//! [`invoke`] wraps any capability call with a timeout, the output check and
//! elapsed/cost accounting. Failures never escape as errors here: they are
//! recorded in the [`EvaluatorInvocation`] and left for the controller to
//! weigh.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;
use tribunal_core::{validate_result, CandidateRecord, EvaluationResult, ValidationError};

use super::{
    Arbiter, ArbiterVerdict, ArbitrationRequest, Billed, EvaluationRequest, EvaluatorBackend,
    EvaluatorError, Extractor,
};
use crate::decision::Stage;
use crate::resilience::Usage;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Ok,
    InvalidOutput,
    ProviderError,
    Timeout,
    Unsupported,
    Crashed,
}

impl InvocationStatus {
    fn of(error: &EvaluatorError) -> Self {
        match error {
            EvaluatorError::Provider(_) => InvocationStatus::ProviderError,
            EvaluatorError::InvalidOutput { .. } => InvocationStatus::InvalidOutput,
            EvaluatorError::Timeout(_) => InvocationStatus::Timeout,
            EvaluatorError::Unsupported(_) => InvocationStatus::Unsupported,
            EvaluatorError::Crashed(_) => InvocationStatus::Crashed,
        }
    }
}

/// Audit record of one call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluatorInvocation {
    pub evaluator: String,
    pub model: String,
    pub stage: Stage,
    pub status: InvocationStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub elapsed_ms: f64,
    pub usage: Usage,
}

impl EvaluatorInvocation {
    pub fn succeeded(&self) -> bool {
        self.status == InvocationStatus::Ok
    }
}

/// A finished call: its audit record and its outcome.
#[derive(Debug)]
pub struct Invoked<T> {
    pub invocation: EvaluatorInvocation,
    pub outcome: Result<T, EvaluatorError>,
}

impl<T> Invoked<T> {
    /// A call whose task died before reporting.
    pub fn crashed(evaluator: &str, model: &str, stage: Stage, reason: String) -> Self {
        let error = EvaluatorError::Crashed(reason);
        Self {
            invocation: EvaluatorInvocation {
                evaluator: evaluator.to_string(),
                model: model.to_string(),
                stage,
                status: InvocationStatus::Crashed,
                error: Some(error.to_string()),
                elapsed_ms: 0.0,
                usage: Usage::unreported_call(),
            },
            outcome: Err(error),
        }
    }
}

/// Run `call` under `timeout`, then `check` its output.
///
/// A timeout or a failed check is recorded exactly like a provider failure.
pub async fn invoke<T, Fut>(
    evaluator: &str,
    model: &str,
    stage: Stage,
    timeout: Duration,
    call: Fut,
    check: impl FnOnce(&T) -> Result<(), ValidationError>,
) -> Invoked<T>
where
    Fut: Future<Output = Result<Billed<T>, EvaluatorError>>,
{
    let started = Instant::now();
    let outcome = match tokio::time::timeout(timeout, call).await {
        Err(_) => Err(EvaluatorError::Timeout(timeout)),
        Ok(Err(e)) => Err(e),
        Ok(Ok(billed)) => match check(&billed.value) {
            Ok(()) => Ok(billed),
            Err(error) => Err(EvaluatorError::invalid(error, billed.usage)),
        },
    };
    let elapsed = started.elapsed();

    let (status, error, usage, outcome) = match outcome {
        Ok(billed) => (InvocationStatus::Ok, None, billed.usage, Ok(billed.value)),
        Err(e) => (
            InvocationStatus::of(&e),
            Some(e.to_string()),
            e.usage().cloned().unwrap_or_else(Usage::unreported_call),
            Err(e),
        ),
    };

    debug!(
        evaluator,
        stage = stage.as_str(),
        status = ?status,
        elapsed_ms = elapsed.as_millis() as u64,
        cost_usd = usage.cost_usd,
        "Evaluator call finished"
    );

    Invoked {
        invocation: EvaluatorInvocation {
            evaluator: evaluator.to_string(),
            model: model.to_string(),
            stage,
            status,
            error,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            usage,
        },
        outcome,
    }
}

/// Evaluate with a backend; output must pass range and consistency checks.
/// Indices in a result for packed input are mapped back to the full record.
pub async fn evaluate_with(
    backend: &dyn EvaluatorBackend,
    request: &EvaluationRequest,
    stage: Stage,
    timeout: Duration,
) -> Invoked<EvaluationResult> {
    let mut invoked = invoke(
        backend.name(),
        backend.model(),
        stage,
        timeout,
        backend.evaluate(request),
        validate_result,
    )
    .await;
    if let Ok(result) = &mut invoked.outcome {
        request.input.restore_indices(result);
    }
    invoked
}

/// Arbitrate; the verdict needs a valid result and a justification.
pub async fn arbitrate_with(
    backend: &dyn EvaluatorBackend,
    arbiter: &dyn Arbiter,
    request: &ArbitrationRequest,
    timeout: Duration,
) -> Invoked<ArbiterVerdict> {
    invoke(
        backend.name(),
        backend.model(),
        Stage::Arbitrate,
        timeout,
        arbiter.arbitrate(request),
        |verdict: &ArbiterVerdict| {
            validate_result(&verdict.result)?;
            if verdict.justification.trim().is_empty() {
                return Err(ValidationError::Inconsistent(
                    "arbitration verdict has no justification".to_string(),
                ));
            }
            Ok(())
        },
    )
    .await
}

/// Extract a record; it must satisfy the record invariants.
pub async fn extract_with(
    backend: &dyn EvaluatorBackend,
    extractor: &dyn Extractor,
    raw: &str,
    timeout: Duration,
) -> Invoked<CandidateRecord> {
    invoke(
        backend.name(),
        backend.model(),
        Stage::Extraction,
        timeout,
        extractor.extract(raw),
        |record: &CandidateRecord| {
            record
                .validate()
                .map_err(|e| ValidationError::Inconsistent(e.to_string()))
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;

    fn no_check(_: &u32) -> Result<(), ValidationError> {
        Ok(())
    }

    #[tokio::test]
    async fn test_successful_call_is_recorded() {
        let usage = Usage {
            calls: 1,
            cost_usd: 0.02,
            ..Default::default()
        };
        let call = async { Ok(Billed::new(7u32, usage.clone())) };
        let invoked = invoke("primary", "model-a", Stage::PrimaryEvaluate, Duration::from_secs(1), call, no_check).await;

        assert_eq!(invoked.outcome, Ok(7));
        assert!(invoked.invocation.succeeded());
        assert_eq!(invoked.invocation.usage, usage);
        assert_eq!(invoked.invocation.model, "model-a");
        assert!(invoked.invocation.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_failure_with_zero_cost() {
        let call = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Billed::free(1u32))
        };
        let invoked = invoke("slow", "model-b", Stage::AdditionalEvaluate, Duration::from_secs(5), call, no_check).await;

        assert_eq!(invoked.outcome, Err(EvaluatorError::Timeout(Duration::from_secs(5))));
        assert_eq!(invoked.invocation.status, InvocationStatus::Timeout);
        assert_eq!(invoked.invocation.usage.calls, 1);
        assert_eq!(invoked.invocation.usage.cost_usd, 0.0);
    }

    #[tokio::test]
    async fn test_failed_check_keeps_spent_usage() {
        let usage = Usage {
            calls: 1,
            cost_usd: 0.03,
            ..Default::default()
        };
        let call = async { Ok(Billed::new(101u32, usage.clone())) };
        let invoked = invoke("primary", "model-a", Stage::PrimaryEvaluate, Duration::from_secs(1), call, |v: &u32| {
            if *v > 100 {
                Err(ValidationError::OutOfRange {
                    field: "overall_score".to_string(),
                    value: *v as f64,
                })
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(invoked.invocation.status, InvocationStatus::InvalidOutput);
        assert_eq!(invoked.invocation.usage, usage);
        assert!(invoked.invocation.error.as_deref().unwrap().contains("invalid output"));
    }

    #[tokio::test]
    async fn test_provider_failure() {
        let call = async { Err::<Billed<u32>, _>(EvaluatorError::Provider(ProviderError::Auth)) };
        let invoked = invoke("primary", "model-a", Stage::PrimaryEvaluate, Duration::from_secs(1), call, no_check).await;
        assert_eq!(invoked.invocation.status, InvocationStatus::ProviderError);
    }

    #[test]
    fn test_crashed_record() {
        let invoked: Invoked<u32> = Invoked::crashed("second", "model-c", Stage::AdditionalEvaluate, "panicked".to_string());
        assert_eq!(invoked.invocation.status, InvocationStatus::Crashed);
        assert!(matches!(invoked.outcome, Err(EvaluatorError::Crashed(_))));
    }

    #[tokio::test]
    async fn test_packed_result_is_mapped_to_full_record() {
        use crate::testing::{sample_job, sample_record, sample_result, Script, ScriptedEvaluator};
        use std::sync::Arc;
        use tribunal_core::packer::{PackedSection, SectionKind};
        use tribunal_core::{EvaluatorInput, PackedContext, Recommendation};

        let section = |kind, original_index| PackedSection {
            kind,
            original_index,
            relevance: 1.0,
        };
        let request = EvaluationRequest {
            input: Arc::new(EvaluatorInput::Packed(PackedContext {
                record: sample_record(),
                sections: vec![section(SectionKind::Experience, 3), section(SectionKind::Skill, 5)],
                citations: Vec::new(),
                original_bytes: 9000,
                packed_bytes: 900,
                compression_ratio: 0.1,
                fallback: false,
            })),
            job: Arc::new(sample_job()),
            instruction: None,
        };
        let evaluator = ScriptedEvaluator::new("primary", Script::Return(sample_result(80.0, Recommendation::Shortlist)));

        let invoked = evaluate_with(&evaluator, &request, Stage::PrimaryEvaluate, Duration::from_secs(1)).await;

        let result = invoked.outcome.unwrap();
        assert_eq!(result.relevance_summary.by_experience[0].experience_index, 3);
        let paths: Vec<&str> = result.strengths[0].evidence.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["experiences[3].missions[0]", "skills[5]", "experiences[3].title"]);
    }
}
