//! # tribunal-runtime
//!
//! Async ensemble orchestration on top of `tribunal-core`.
//!
//! This crate owns everything that touches the outside world: evaluator
//! calls, timeouts, retries, cost accounting, caching and consent. The
//! deterministic stages (prefilter, packing, escalation, aggregation) live in
//! `tribunal-core` and are only sequenced from here.
//!
//! ## Request flow
//!
//! 1. Consent check and masking ([`compliance`])
//! 2. Cache lookup ([`cache`])
//! 3. Prefilter, then context packing
//! 4. Primary evaluator, escalation, additional evaluators in parallel
//! 5. Aggregation, then arbitration when consensus is too weak ([`arbitration`])
//! 6. Decision with debug trace, cost and audit snapshot ([`decision`])
//!
//! A failing evaluator never fails the request on its own. The request fails
//! only when consent is denied, extraction is impossible, or no evaluator
//! produced a valid result.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tribunal_runtime::{Orchestrator, RequestOptions, RuntimeConfig};
//! use tribunal_core::Mode;
//!
//! let config = RuntimeConfig::from_yaml_file("tribunal.yaml")?;
//! let orchestrator = Orchestrator::from_config(config, &providers)?;
//!
//! let decision = orchestrator
//!     .evaluate(&record, &job, &RequestOptions::new(Mode::Balanced))
//!     .await?;
//! println!("{:?} ({})", decision.recommendation(), decision.consensus.level.as_str());
//! ```

pub mod arbitration;
pub mod cache;
pub mod compliance;
pub mod config;
pub mod decision;
pub mod evaluators;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;

#[cfg(any(test, feature = "mock"))]
pub mod testing;

pub use arbitration::{ArbitrationOutcome, ResolvedDisagreement};
pub use cache::{CacheError, CacheSettings, DecisionStore, MokaDecisionStore};
pub use compliance::{BasicCompliance, Compliance, ComplianceSettings, MaskingLevel};
pub use config::{ConfigError, EvaluatorConfig, RuntimeConfig, TimeoutSettings};
pub use decision::{
    AggregatedDecision, AuditSnapshot, ConsentOutcome, CostBreakdown, DebugTrace, FailureKind,
    PerformanceTimings, Stage, StageFailure,
};
pub use evaluators::{
    Arbiter, EvaluatorBackend, EvaluatorError, EvaluatorInvocation, EvaluatorRegistry, Extractor,
    InvocationStatus,
};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, PipelineError, RequestOptions};
pub use providers::{LlmProvider, ProviderError, ProviderRegistry};
pub use resilience::{BudgetSettings, CostLedger, RetrySettings, Usage};
