//! Escalation policy.
//!
//! Given one evaluator's result, decide whether more evaluators must be
//! consulted. Every trigger is always evaluated; only the number of active
//! triggers needed to escalate depends on the mode.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::evaluation::EvaluationResult;
use crate::job::JobSpecification;
use crate::mode::ModePolicy;
use crate::prefilter::PrefilterVerdict;

/// Trigger thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationConfig {
    /// Minimum citations across strengths and relevance judgements
    #[serde(default = "default_min_evidence")]
    pub min_evidence: usize,

    /// Largest tolerated gap between subscores, in points
    #[serde(default = "default_divergence_threshold")]
    pub divergence_threshold: f64,

    /// Minimum citations on each failed mandatory rule
    #[serde(default = "default_must_have_min_evidence")]
    pub must_have_min_evidence: usize,

    /// Prefilter severity at which `prefilter_concern` fires
    #[serde(default = "default_prefilter_severity")]
    pub prefilter_severity: f64,
}

fn default_min_evidence() -> usize {
    3
}

fn default_divergence_threshold() -> f64 {
    25.0
}

fn default_must_have_min_evidence() -> usize {
    2
}

fn default_prefilter_severity() -> f64 {
    0.6
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            min_evidence: default_min_evidence(),
            divergence_threshold: default_divergence_threshold(),
            must_have_min_evidence: default_must_have_min_evidence(),
            prefilter_severity: default_prefilter_severity(),
        }
    }
}

/// A named uncertainty signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    BorderlineScore,
    WeakEvidence,
    ScoreDivergence,
    MustHaveUncertain,
    PrefilterConcern,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::BorderlineScore => "borderline_score",
            Trigger::WeakEvidence => "weak_evidence",
            Trigger::ScoreDivergence => "score_divergence",
            Trigger::MustHaveUncertain => "must_have_uncertain",
            Trigger::PrefilterConcern => "prefilter_concern",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationDecision {
    pub needs_more: bool,
    pub triggers: BTreeSet<Trigger>,

    /// Share of considered triggers that stayed inactive
    pub confidence: f64,

    pub recommended_additional: usize,
}

impl EscalationDecision {
    /// Trigger names in order, for traces.
    pub fn reasons(&self) -> Vec<String> {
        self.triggers.iter().map(|t| t.as_str().to_string()).collect()
    }
}

/// Pure trigger evaluation plus the mode threshold.
#[derive(Debug, Clone, Default)]
pub struct EscalationPolicy {
    config: EscalationConfig,
}

impl EscalationPolicy {
    pub fn new(config: EscalationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Active triggers among the four result-based triggers.
    pub fn triggers(&self, result: &EvaluationResult, job: &JobSpecification) -> BTreeSet<Trigger> {
        let mut active = BTreeSet::new();

        let t = &job.thresholds;
        if result.overall_score >= t.consider_min && result.overall_score < t.shortlist_min {
            active.insert(Trigger::BorderlineScore);
        }

        if result.evidence_count() < self.config.min_evidence {
            active.insert(Trigger::WeakEvidence);
        }

        let scores = result.subscores.named().map(|(_, v)| v);
        let max = scores.iter().copied().fold(f64::MIN, f64::max);
        let min = scores.iter().copied().fold(f64::MAX, f64::min);
        if max - min > self.config.divergence_threshold {
            active.insert(Trigger::ScoreDivergence);
        }

        if result
            .failed_rules
            .iter()
            .any(|r| r.evidence.len() < self.config.must_have_min_evidence)
        {
            active.insert(Trigger::MustHaveUncertain);
        }

        active
    }

    /// Decide whether `policy` calls for more evaluators after `result`.
    pub fn needs_more(
        &self,
        result: &EvaluationResult,
        job: &JobSpecification,
        policy: &ModePolicy,
    ) -> EscalationDecision {
        self.decide(self.triggers(result, job), 4, policy)
    }

    /// Like [`needs_more`](Self::needs_more), with a fifth trigger fed by the
    /// prefilter's soft flags.
    pub fn needs_more_with_signals(
        &self,
        result: &EvaluationResult,
        job: &JobSpecification,
        policy: &ModePolicy,
        verdict: &PrefilterVerdict,
    ) -> EscalationDecision {
        let mut triggers = self.triggers(result, job);
        if verdict.max_severity() >= self.config.prefilter_severity {
            triggers.insert(Trigger::PrefilterConcern);
        }
        self.decide(triggers, 5, policy)
    }

    fn decide(&self, triggers: BTreeSet<Trigger>, considered: usize, policy: &ModePolicy) -> EscalationDecision {
        let needs_more = policy.allows_escalation() && policy.escalates_on(triggers.len());
        EscalationDecision {
            needs_more,
            confidence: 1.0 - triggers.len() as f64 / considered as f64,
            recommended_additional: if needs_more { policy.additional_evaluators } else { 0 },
            triggers,
        }
    }
}
