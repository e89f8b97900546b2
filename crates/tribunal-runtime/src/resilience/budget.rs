//! Cost accounting.
//!
//! Every evaluator call produces a [`Usage`]. The controller charges it to a
//! [`CostLedger`] under the stage and evaluator that spent it, and records
//! elapsed time at each stage boundary, so a request that fails half-way
//! still reports what it spent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::decision::{CostBreakdown, PerformanceTimings, Stage};
use crate::providers::TokenUsage;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_write: f64,
    pub cache_read: f64,
}

/// Price table by model family; unknown models are priced as Sonnet.
pub fn pricing_for(model: &str) -> ModelPricing {
    let (input, output, cache_write, cache_read) = match model {
        m if m.contains("sonnet-4-5") => (3.0, 15.0, 3.75, 0.3),
        m if m.contains("opus-4-5") => (5.0, 25.0, 6.25, 0.5),
        m if m.contains("haiku-4-5") => (1.0, 5.0, 1.25, 0.1),
        m if m.contains("gpt-4o-mini") => (0.15, 0.6, 0.0, 0.0),
        m if m.contains("gpt-4o") => (2.5, 10.0, 0.0, 0.0),
        _ => (3.0, 15.0, 3.75, 0.3),
    };
    ModelPricing {
        input,
        output,
        cache_write,
        cache_read,
    }
}

pub fn estimate_cost(tokens: &TokenUsage, model: &str) -> f64 {
    let p = pricing_for(model);
    let per = |count: u64, rate: f64| count as f64 / 1_000_000.0 * rate;
    per(tokens.input_tokens, p.input)
        + per(tokens.output_tokens, p.output)
        + per(tokens.cache_write_tokens, p.cache_write)
        + per(tokens.cache_read_tokens, p.cache_read)
}

/// Tokens, calls and dollars spent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub tokens: TokenUsage,
    pub calls: u32,
    pub cost_usd: f64,
}

impl Usage {
    /// One call's worth of usage, priced for `model`.
    pub fn priced(tokens: TokenUsage, model: &str) -> Self {
        Self {
            cost_usd: estimate_cost(&tokens, model),
            tokens,
            calls: 1,
        }
    }

    /// A call that was made but reported nothing (timeout, transport error).
    pub fn unreported_call() -> Self {
        Self {
            calls: 1,
            ..Default::default()
        }
    }

    pub fn add(&mut self, other: &Usage) {
        self.tokens.add(&other.tokens);
        self.calls += other.calls;
        self.cost_usd += other.cost_usd;
    }

    pub fn is_empty(&self) -> bool {
        self.calls == 0 && self.cost_usd == 0.0
    }
}

/// Per-request spending cap.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BudgetSettings {
    /// Stop escalating and arbitrating once this much has been spent
    #[serde(default)]
    pub max_request_cost_usd: Option<f64>,
}

impl BudgetSettings {
    pub fn is_exhausted(&self, spent_usd: f64) -> bool {
        self.max_request_cost_usd
            .map(|cap| spent_usd >= cap)
            .unwrap_or(false)
    }

    pub fn validate(&self) -> Result<(), String> {
        match self.max_request_cost_usd {
            Some(cap) if !cap.is_finite() || cap < 0.0 => {
                Err(format!("max_request_cost_usd must be a non-negative number, got {}", cap))
            }
            _ => Ok(()),
        }
    }
}

/// Time and money per stage and per evaluator for one request.
#[derive(Debug, Clone, Default)]
pub struct CostLedger {
    elapsed: BTreeMap<Stage, Duration>,
    by_stage: BTreeMap<Stage, Usage>,
    by_evaluator: BTreeMap<String, Usage>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add wall time to a stage. A stage entered twice accumulates.
    pub fn record_elapsed(&mut self, stage: Stage, elapsed: Duration) {
        *self.elapsed.entry(stage).or_default() += elapsed;
    }

    pub fn charge(&mut self, stage: Stage, evaluator: &str, usage: &Usage) {
        self.by_stage.entry(stage).or_default().add(usage);
        self.by_evaluator
            .entry(evaluator.to_string())
            .or_default()
            .add(usage);
    }

    pub fn total(&self) -> Usage {
        let mut total = Usage::default();
        for usage in self.by_stage.values() {
            total.add(usage);
        }
        total
    }

    pub fn total_cost(&self) -> f64 {
        self.by_stage.values().map(|u| u.cost_usd).sum()
    }

    pub fn elapsed(&self, stage: Stage) -> Duration {
        self.elapsed.get(&stage).copied().unwrap_or_default()
    }

    pub fn timings(&self, total: Duration) -> PerformanceTimings {
        PerformanceTimings {
            stages_ms: self
                .elapsed
                .iter()
                .map(|(stage, d)| (*stage, d.as_secs_f64() * 1000.0))
                .collect(),
            total_ms: total.as_secs_f64() * 1000.0,
        }
    }

    pub fn breakdown(&self) -> CostBreakdown {
        CostBreakdown {
            total: self.total(),
            by_stage: self.by_stage.clone(),
            by_evaluator: self.by_evaluator.clone(),
        }
    }
}
