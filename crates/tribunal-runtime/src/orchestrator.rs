//! Orchestration controller.
//!
//! Runs one request through the pipeline:
//!
//! ```text
//! Compliance → CacheLookup → Prefilter → Pack → PrimaryEvaluate → Escalate
//!   → [AdditionalEvaluate, concurrent] → Aggregate → Arbitrate? → Finalize → CacheStore
//! ```
//!
//! The controller is the only place evaluator calls run concurrently and the
//! only place a decision is assembled. Time and cost are charged at every
//! stage boundary, so failed requests still account for what they spent.
//!
//! Only three failures leave [`Orchestrator::evaluate`]: extraction failure,
//! missing consent and the loss of every invoked evaluator. Everything else
//! (single evaluator failures, arbitration failure, cache trouble, budget
//! exhaustion) is recorded in the decision's trace.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use tribunal_core::{
    AggregationError, Aggregator, CandidateRecord, ConsensusMetrics, ContextPacker,
    EscalationPolicy, EvaluationResult, EvaluatorInput, JobSpecification, Mode, ModePolicy, Point,
    Prefilter, PrefilterVerdict, Recommendation,
};
use uuid::Uuid;

use crate::arbitration::{self, ArbitrationOutcome};
use crate::cache::{decision_key, raw_key, DecisionStore, MokaDecisionStore};
use crate::compliance::{BasicCompliance, Compliance, MaskingLevel};
use crate::config::{ConfigError, RuntimeConfig};
use crate::decision::{
    AggregatedDecision, AuditSnapshot, ConsentOutcome, DebugTrace, FailureKind, Stage, StageFailure,
};
use crate::evaluators::{
    evaluate_with, extract_with, EvaluationRequest, EvaluatorBackend, EvaluatorError, EvaluatorInvocation,
    EvaluatorRegistry, Invoked,
};
use crate::prompts::resolve_instruction;
use crate::providers::ProviderRegistry;
use crate::resilience::CostLedger;

/// Escalation reason recorded when the primary evaluator failed.
pub const REASON_PRIMARY_FAILED: &str = "primary_failed";

/// Escalation reason recorded when a mode consults every evaluator.
pub const REASON_INVOKE_ALL: &str = "mode_invokes_all";

/// Recorded when the request budget stopped escalation or arbitration.
pub const REASON_BUDGET_EXHAUSTED: &str = "cost_budget_exhausted";

/// Request-level failures.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("extraction failed: {0}")]
    Extraction(#[source] EvaluatorError),

    #[error("consent denied for subject '{subject_id}'")]
    ConsentDenied { subject_id: String },

    /// Every invoked evaluator failed; no decision exists.
    #[error("aggregation impossible, every invoked evaluator failed ({})", .failed.join(", "))]
    AggregationImpossible {
        failed: Vec<String>,
        invocations: Vec<EvaluatorInvocation>,
    },
}

/// Per-request options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequestOptions {
    #[serde(default)]
    pub mode: Mode,

    /// Overrides the configured default masking level
    #[serde(default)]
    pub masking: Option<MaskingLevel>,

    /// Skip both cache lookup and cache store
    #[serde(default)]
    pub bypass_cache: bool,
}

impl RequestOptions {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_masking(mut self, masking: MaskingLevel) -> Self {
        self.masking = Some(masking);
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Secondary cache entry for raw input: enough to re-check consent and find
/// the decision without extracting again.
#[derive(Debug, Serialize, Deserialize)]
struct RawEntry {
    subject_id: String,
    decision_key: String,
}

/// Mutable accounting for one request.
struct RequestState {
    request_id: Uuid,
    started: Instant,
    ledger: CostLedger,
    invocations: Vec<EvaluatorInvocation>,
    failures: Vec<StageFailure>,
}

impl RequestState {
    fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            started: Instant::now(),
            ledger: CostLedger::new(),
            invocations: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn elapsed(&mut self, stage: Stage, since: Instant) {
        self.ledger.record_elapsed(stage, since.elapsed());
    }

    /// Charge a finished call and keep its outcome.
    fn settle<T>(&mut self, invoked: Invoked<T>) -> Result<T, EvaluatorError> {
        let Invoked { invocation, outcome } = invoked;
        self.ledger.charge(invocation.stage, &invocation.evaluator, &invocation.usage);
        if let Err(e) = &outcome {
            warn!(
                request_id = %self.request_id,
                evaluator = %invocation.evaluator,
                stage = invocation.stage.as_str(),
                error = %e,
                "Evaluator call failed"
            );
            let kind = match invocation.stage {
                Stage::Extraction => None,
                Stage::Arbitrate => Some(FailureKind::Arbitration),
                _ => Some(FailureKind::Evaluator),
            };
            if let Some(kind) = kind {
                self.failures.push(StageFailure {
                    stage: invocation.stage,
                    kind,
                    evaluator: Some(invocation.evaluator.clone()),
                    message: e.to_string(),
                });
            }
        }
        self.invocations.push(invocation);
        outcome
    }

    fn soft_failure(&mut self, stage: Stage, kind: FailureKind, message: impl Into<String>) {
        let message = message.into();
        warn!(request_id = %self.request_id, stage = stage.as_str(), %message, "Soft failure");
        self.failures.push(StageFailure::new(stage, kind, message));
    }
}

/// What is fixed for a request once compliance has run.
struct RequestContext {
    job: Arc<JobSpecification>,
    job_hash: String,
    mode: Mode,
    masking: MaskingLevel,
    consent: ConsentOutcome,
    cache_key: Option<String>,
}

/// The orchestration controller.
///
/// Holds only read-only configuration and shared collaborators; concurrent
/// requests share nothing but the decision store.
pub struct Orchestrator {
    config: RuntimeConfig,
    registry: Arc<EvaluatorRegistry>,
    compliance: Arc<dyn Compliance>,
    store: Option<Arc<dyn DecisionStore>>,
    prefilter: Prefilter,
    packer: ContextPacker,
    escalation: EscalationPolicy,
    aggregator: Aggregator,
    instruction: Option<Arc<str>>,
}

impl Orchestrator {
    pub fn builder(registry: Arc<EvaluatorRegistry>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(registry)
    }

    /// Build evaluators from `config` through `providers`, with default
    /// compliance and an in-process cache.
    pub fn from_config(config: RuntimeConfig, providers: &ProviderRegistry) -> Result<Self, ConfigError> {
        let registry = EvaluatorRegistry::from_config(&config, providers)?;
        Self::builder(Arc::new(registry)).config(config).build()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &EvaluatorRegistry {
        &self.registry
    }

    /// Evaluate a structured record against a job.
    pub async fn evaluate(
        &self,
        record: &CandidateRecord,
        job: &JobSpecification,
        options: &RequestOptions,
    ) -> Result<AggregatedDecision, PipelineError> {
        let mut state = RequestState::new();
        self.execute(record, job, options, &mut state).await
    }

    /// Extract a record from raw input, then evaluate it.
    ///
    /// A repeat of an earlier raw request is answered from cache without
    /// calling the extractor again.
    pub async fn evaluate_raw(
        &self,
        raw: &str,
        job: &JobSpecification,
        options: &RequestOptions,
    ) -> Result<AggregatedDecision, PipelineError> {
        let mut state = RequestState::new();
        let masking = self.masking(options);
        let job_hash = job.content_hash();
        let raw_key = self
            .cache_enabled(options)
            .then(|| raw_key(raw, &job_hash, options.mode, masking));

        if let Some(key) = &raw_key {
            let since = Instant::now();
            let entry = self.cache_get(key, &mut state).await;
            state.elapsed(Stage::CacheLookup, since);
            if let Some(entry) = entry.and_then(|json| self.decode_raw_entry(&json, &mut state)) {
                let since = Instant::now();
                let consent = self.check_consent(&entry.subject_id).await?;
                state.elapsed(Stage::Compliance, since);
                debug!(request_id = %state.request_id, ?consent, "Raw input seen before");

                let since = Instant::now();
                let hit = self.cache_get(&entry.decision_key, &mut state).await;
                state.elapsed(Stage::CacheLookup, since);
                if let Some(decision) = hit.and_then(|json| self.decode_decision(&json, &mut state)) {
                    return Ok(self.reissue(decision, &state));
                }
            }
        }

        let since = Instant::now();
        let invoked = match self.registry.extractor() {
            Some((backend, extractor)) => {
                extract_with(backend.as_ref(), extractor, raw, self.config.timeouts.extraction).await
            }
            None => return Err(PipelineError::Extraction(EvaluatorError::Unsupported("extraction"))),
        };
        let extracted = state.settle(invoked);
        state.elapsed(Stage::Extraction, since);
        let record = extracted.map_err(PipelineError::Extraction)?;

        let decision = self.execute(&record, job, options, &mut state).await?;

        if let Some(key) = raw_key {
            let entry = decision_key(&record, &job_hash, options.mode, masking)
                .ok()
                .and_then(|decision_key| {
                    serde_json::to_string(&RawEntry {
                        subject_id: record.identity.subject_id.clone(),
                        decision_key,
                    })
                    .ok()
                });
            if let Some(entry) = entry {
                self.cache_put(key, entry, &mut state).await;
            }
        }
        Ok(decision)
    }

    async fn execute(
        &self,
        record: &CandidateRecord,
        job: &JobSpecification,
        options: &RequestOptions,
        state: &mut RequestState,
    ) -> Result<AggregatedDecision, PipelineError> {
        // Consent before anything else, cached decisions included
        let since = Instant::now();
        let consent = self.check_consent(&record.identity.subject_id).await?;
        let masking = self.masking(options);
        let masked = self.compliance.mask(record, masking);
        state.elapsed(Stage::Compliance, since);

        let job_hash = job.content_hash();
        let mut ctx = RequestContext {
            job: Arc::new(job.clone()),
            job_hash,
            mode: options.mode,
            masking,
            consent,
            cache_key: None,
        };

        if self.cache_enabled(options) {
            let since = Instant::now();
            match decision_key(record, &ctx.job_hash, ctx.mode, masking) {
                Ok(key) => ctx.cache_key = Some(key),
                Err(e) => state.soft_failure(Stage::CacheLookup, FailureKind::Cache, e.to_string()),
            }
            let hit = match &ctx.cache_key {
                Some(key) => self.cache_get(key, state).await,
                None => None,
            };
            state.elapsed(Stage::CacheLookup, since);
            if let Some(decision) = hit.and_then(|json| self.decode_decision(&json, state)) {
                return Ok(self.reissue(decision, state));
            }
        }

        let mut decision = self.run_pipeline(&masked, &ctx, state).await?;

        if let Some(key) = ctx.cache_key {
            let since = Instant::now();
            match decision.to_json() {
                Ok(json) => self.cache_put(key, json, state).await,
                Err(e) => state.soft_failure(Stage::CacheStore, FailureKind::Cache, e.to_string()),
            }
            let ms = since.elapsed().as_secs_f64() * 1000.0;
            decision.performance.stages_ms.insert(Stage::CacheStore, ms);
            decision.audit.stages_ms.insert(Stage::CacheStore, ms);
            decision.debug.stage_failures.extend(
                state
                    .failures
                    .drain(..)
                    .filter(|f| f.stage == Stage::CacheStore),
            );
        }

        Ok(decision)
    }

    async fn run_pipeline(
        &self,
        record: &CandidateRecord,
        ctx: &RequestContext,
        state: &mut RequestState,
    ) -> Result<AggregatedDecision, PipelineError> {
        let policy = self.config.modes.policy(ctx.mode);
        let mut trace = DebugTrace::new(ctx.mode);

        // Prefilter
        let since = Instant::now();
        let verdict = self.prefilter.run(record, &ctx.job);
        state.elapsed(Stage::Prefilter, since);
        trace.prefilter_flags = verdict.soft_flags.clone();
        trace.prefilter_reasons = verdict.reasons.clone();
        debug!(
            request_id = %state.request_id,
            pass = verdict.pass,
            confidence = verdict.confidence,
            "Prefilter finished"
        );

        if !verdict.pass && self.prefilter.config().short_circuit_on_reject {
            info!(request_id = %state.request_id, "Prefilter rejected record, no evaluator called");
            trace.early_exit = true;
            return Ok(self.finalize(
                out_of_scope_result(&verdict),
                BTreeMap::new(),
                ConsensusMetrics::none(),
                None,
                None,
                trace,
                ctx,
                state,
            ));
        }

        // Pack
        let since = Instant::now();
        let packed = self.packer.pack(record, &ctx.job);
        trace.packed = !packed.fallback;
        trace.compression_ratio = (!packed.fallback).then_some(packed.compression_ratio);
        let request = EvaluationRequest {
            input: Arc::new(EvaluatorInput::from(packed)),
            job: ctx.job.clone(),
            instruction: self.instruction.clone(),
        };
        state.elapsed(Stage::Pack, since);

        // Primary, sequential: its result drives escalation
        let mut results: BTreeMap<String, Option<EvaluationResult>> = BTreeMap::new();
        let Some(primary) = self.registry.primary().cloned() else {
            return Err(PipelineError::AggregationImpossible {
                failed: Vec::new(),
                invocations: std::mem::take(&mut state.invocations),
            });
        };
        let since = Instant::now();
        let invoked = evaluate_with(
            primary.as_ref(),
            &request,
            Stage::PrimaryEvaluate,
            self.config.timeouts.evaluator,
        )
        .await;
        let primary_result = state.settle(invoked).ok();
        state.elapsed(Stage::PrimaryEvaluate, since);
        trace.evaluators_used.push(primary.name().to_string());
        results.insert(primary.name().to_string(), primary_result.clone());

        // Escalate
        let since = Instant::now();
        let (reasons, mut additional) = self.escalate(primary_result.as_ref(), &ctx.job, policy, &verdict);
        trace.escalation_reasons = reasons;
        if !additional.is_empty() && self.config.budget.is_exhausted(state.ledger.total_cost()) {
            trace.escalation_reasons.push(REASON_BUDGET_EXHAUSTED.to_string());
            state.soft_failure(
                Stage::Escalate,
                FailureKind::Budget,
                format!("skipped {} additional evaluator(s)", additional.len()),
            );
            additional.clear();
        }
        state.elapsed(Stage::Escalate, since);
        debug!(
            request_id = %state.request_id,
            reasons = ?trace.escalation_reasons,
            additional = additional.len(),
            "Escalation decided"
        );

        // Fan out
        if !additional.is_empty() {
            let since = Instant::now();
            for invoked in self.fan_out(additional, &request).await {
                let name = invoked.invocation.evaluator.clone();
                trace.evaluators_used.push(name.clone());
                results.insert(name, state.settle(invoked).ok());
            }
            state.elapsed(Stage::AdditionalEvaluate, since);
        }

        // Aggregate
        let since = Instant::now();
        let aggregation = match self.aggregator.aggregate(
            &results,
            self.registry.priority(),
            self.registry.weights(),
            &ctx.job,
        ) {
            Ok(aggregation) => aggregation,
            Err(AggregationError::NoSurvivors { failed }) => {
                warn!(request_id = %state.request_id, ?failed, "Every invoked evaluator failed");
                return Err(PipelineError::AggregationImpossible {
                    failed,
                    invocations: std::mem::take(&mut state.invocations),
                });
            }
        };
        state.elapsed(Stage::Aggregate, since);
        trace.applied_weights = aggregation.weights.clone();
        trace.disagreements = aggregation.disagreements.clone();

        // Arbitrate
        let level = aggregation.consensus.level;
        let mut final_result = aggregation.result;
        let mut outcome = None;
        let mut arbitration_reason = None;
        if policy.arbitrates_on(level) {
            let since = Instant::now();
            let reason = format!("{}_consensus", level.as_str());
            if self.config.budget.is_exhausted(state.ledger.total_cost()) {
                state.soft_failure(Stage::Arbitrate, FailureKind::Budget, REASON_BUDGET_EXHAUSTED);
            } else if let Some((backend, arbiter)) = self.registry.arbiter() {
                let raw: BTreeMap<String, EvaluationResult> = results
                    .iter()
                    .filter_map(|(name, r)| r.clone().map(|r| (name.clone(), r)))
                    .collect();
                let arbitration = arbitration::arbitrate(
                    backend.as_ref(),
                    arbiter,
                    raw,
                    &aggregation.disagreements,
                    ctx.job.clone(),
                    self.instruction.clone(),
                    self.config.timeouts.arbitration,
                )
                .await;
                let invoked = Invoked {
                    invocation: arbitration.invocation,
                    outcome: arbitration.outcome,
                };
                if let Ok(arbitrated) = state.settle(invoked) {
                    final_result = arbitrated.result.clone();
                    outcome = Some(arbitrated);
                }
                arbitration_reason = Some(reason);
            } else {
                state.soft_failure(Stage::Arbitrate, FailureKind::Arbitration, "no arbiter configured");
            }
            state.elapsed(Stage::Arbitrate, since);
        }

        Ok(self.finalize(
            final_result,
            results,
            aggregation.consensus,
            outcome,
            arbitration_reason,
            trace,
            ctx,
            state,
        ))
    }

    /// Escalation reasons and the evaluators to add.
    fn escalate(
        &self,
        primary: Option<&EvaluationResult>,
        job: &JobSpecification,
        policy: &ModePolicy,
        verdict: &PrefilterVerdict,
    ) -> (Vec<String>, Vec<Arc<dyn EvaluatorBackend>>) {
        let all = self.registry.len();
        match primary {
            Some(result) => {
                let decision = self.escalation.needs_more_with_signals(result, job, policy, verdict);
                let mut reasons = decision.reasons();
                let additional = if policy.invoke_all {
                    reasons.insert(0, REASON_INVOKE_ALL.to_string());
                    self.registry.additional(all)
                } else {
                    self.registry.additional(decision.recommended_additional)
                };
                (reasons, additional)
            }
            None if policy.allows_escalation() => {
                let count = if policy.invoke_all { all } else { policy.additional_evaluators };
                (vec![REASON_PRIMARY_FAILED.to_string()], self.registry.additional(count))
            }
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Run `backends` concurrently and wait for every one of them.
    ///
    /// Each call has its own timeout and failure domain; a panic in one task
    /// is recorded as that evaluator's crash.
    async fn fan_out(
        &self,
        backends: Vec<Arc<dyn EvaluatorBackend>>,
        request: &EvaluationRequest,
    ) -> Vec<Invoked<EvaluationResult>> {
        let timeout = self.config.timeouts.evaluator;
        let handles: Vec<_> = backends
            .into_iter()
            .map(|backend| {
                let name = backend.name().to_string();
                let model = backend.model().to_string();
                let request = request.clone();
                let handle = tokio::spawn(async move {
                    evaluate_with(backend.as_ref(), &request, Stage::AdditionalEvaluate, timeout).await
                });
                (name, model, handle)
            })
            .collect();

        let mut settled = Vec::with_capacity(handles.len());
        for (name, model, handle) in handles {
            settled.push(match handle.await {
                Ok(invoked) => invoked,
                Err(e) => Invoked::crashed(&name, &model, Stage::AdditionalEvaluate, e.to_string()),
            });
        }
        settled
    }

    #[allow(clippy::too_many_arguments)]
    fn finalize(
        &self,
        final_decision: EvaluationResult,
        results: BTreeMap<String, Option<EvaluationResult>>,
        consensus: ConsensusMetrics,
        arbitration: Option<ArbitrationOutcome>,
        arbitration_reason: Option<String>,
        mut trace: DebugTrace,
        ctx: &RequestContext,
        state: &mut RequestState,
    ) -> AggregatedDecision {
        let since = Instant::now();
        trace.stage_failures = std::mem::take(&mut state.failures);
        let arbitration_ran = state.invocations.iter().any(|i| i.stage == Stage::Arbitrate);
        state.elapsed(Stage::Finalize, since);

        let total = state.started.elapsed();
        let performance = state.ledger.timings(total);
        let cost = state.ledger.breakdown();

        let audit = AuditSnapshot {
            engine: tribunal_core::ENGINE_NAME.to_string(),
            engine_version: tribunal_core::ENGINE_VERSION.to_string(),
            request_id: state.request_id,
            timestamp: Utc::now(),
            source_request_id: None,
            job_title: ctx.job.title.clone(),
            job_hash: ctx.job_hash.clone(),
            mode: ctx.mode,
            masking: ctx.masking,
            consent: ctx.consent,
            invocations: state.invocations.clone(),
            consensus_level: consensus.level,
            arbitration_ran,
            arbitration_reason,
            total_cost_usd: cost.total.cost_usd,
            total_ms: performance.total_ms,
            stages_ms: performance.stages_ms.clone(),
            served_from_cache: false,
        };

        info!(
            request_id = %state.request_id,
            mode = ctx.mode.as_str(),
            recommendation = final_decision.recommendation.as_str(),
            consensus = consensus.level.as_str(),
            evaluators = trace.evaluators_used.len(),
            cost_usd = audit.total_cost_usd,
            elapsed_ms = total.as_millis() as u64,
            "Decision complete"
        );

        AggregatedDecision::new(
            final_decision,
            results,
            consensus,
            arbitration,
            trace,
            performance,
            cost,
            audit,
        )
    }

    fn reissue(&self, decision: AggregatedDecision, state: &RequestState) -> AggregatedDecision {
        let performance = state.ledger.timings(state.started.elapsed());
        info!(
            request_id = %state.request_id,
            source_request_id = %decision.audit.request_id,
            "Decision served from cache"
        );
        decision.reissue(state.request_id, Utc::now(), performance)
    }

    fn masking(&self, options: &RequestOptions) -> MaskingLevel {
        options.masking.unwrap_or(self.config.compliance.masking)
    }

    fn cache_enabled(&self, options: &RequestOptions) -> bool {
        self.store.is_some() && !options.bypass_cache
    }

    async fn check_consent(&self, subject_id: &str) -> Result<ConsentOutcome, PipelineError> {
        if !self.config.compliance.require_consent {
            return Ok(ConsentOutcome::NotRequired);
        }
        if self.compliance.has_consent(subject_id).await {
            Ok(ConsentOutcome::Granted)
        } else {
            warn!(subject_id, "Consent missing, request refused");
            Err(PipelineError::ConsentDenied {
                subject_id: subject_id.to_string(),
            })
        }
    }

    async fn cache_get(&self, key: &str, state: &mut RequestState) -> Option<String> {
        let store = self.store.as_ref()?;
        match store.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                state.soft_failure(Stage::CacheLookup, FailureKind::Cache, e.to_string());
                None
            }
        }
    }

    async fn cache_put(&self, key: String, value: String, state: &mut RequestState) {
        if let Some(store) = &self.store {
            if let Err(e) = store.put(key, value).await {
                state.soft_failure(Stage::CacheStore, FailureKind::Cache, e.to_string());
            }
        }
    }

    fn decode_decision(&self, json: &str, state: &mut RequestState) -> Option<AggregatedDecision> {
        match AggregatedDecision::from_json(json) {
            Ok(decision) => Some(decision),
            Err(e) => {
                state.soft_failure(Stage::CacheLookup, FailureKind::Cache, format!("unreadable entry: {}", e));
                None
            }
        }
    }

    fn decode_raw_entry(&self, json: &str, state: &mut RequestState) -> Option<RawEntry> {
        match serde_json::from_str(json) {
            Ok(entry) => Some(entry),
            Err(e) => {
                state.soft_failure(Stage::CacheLookup, FailureKind::Cache, format!("unreadable entry: {}", e));
                None
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("cache", &self.store.is_some())
            .finish()
    }
}

/// Deterministic decision for a record the prefilter ruled out of scope.
fn out_of_scope_result(verdict: &PrefilterVerdict) -> EvaluationResult {
    EvaluationResult {
        meets_all_mandatory: false,
        failed_rules: Vec::new(),
        relevance_summary: Default::default(),
        subscores: Default::default(),
        overall_score: 0.0,
        recommendation: Recommendation::Reject,
        strengths: Vec::new(),
        improvements: verdict.reasons.iter().map(Point::new).collect(),
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    registry: Arc<EvaluatorRegistry>,
    config: RuntimeConfig,
    compliance: Option<Arc<dyn Compliance>>,
    store: Option<Arc<dyn DecisionStore>>,
    cache_disabled: bool,
}

impl OrchestratorBuilder {
    pub fn new(registry: Arc<EvaluatorRegistry>) -> Self {
        Self {
            registry,
            config: RuntimeConfig::default(),
            compliance: None,
            store: None,
            cache_disabled: false,
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to [`BasicCompliance`] with no consented subjects.
    pub fn compliance(mut self, compliance: Arc<dyn Compliance>) -> Self {
        self.compliance = Some(compliance);
        self
    }

    /// Defaults to a [`MokaDecisionStore`] sized from the cache settings.
    pub fn store(mut self, store: Arc<dyn DecisionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache_disabled = true;
        self
    }

    pub fn build(self) -> Result<Orchestrator, ConfigError> {
        self.config.validate()?;
        if self.registry.is_empty() {
            return Err(ConfigError::Invalid("at least one evaluator is required".to_string()));
        }

        let store = if self.cache_disabled || !self.config.cache.enabled {
            None
        } else {
            Some(
                self.store
                    .unwrap_or_else(|| Arc::new(MokaDecisionStore::from_settings(&self.config.cache))),
            )
        };
        let instruction = resolve_instruction(&self.config.instructions, &self.config.domain_key).map(Arc::from);

        Ok(Orchestrator {
            prefilter: Prefilter::new(self.config.prefilter.clone()),
            packer: ContextPacker::new(self.config.packer.clone()),
            escalation: EscalationPolicy::new(self.config.escalation.clone()),
            aggregator: Aggregator::new(self.config.aggregator.clone()),
            compliance: self
                .compliance
                .unwrap_or_else(|| Arc::new(BasicCompliance::new())),
            registry: self.registry,
            store,
            instruction,
            config: self.config,
        })
    }
}
