//! Evaluator backends.
//!
//! Every backend implements [`EvaluatorBackend`]. Extraction and arbitration
//! are separate capabilities ([`Extractor`], [`Arbiter`]) a backend may also
//! offer; the controller checks for them through `as_extractor` /
//! `as_arbiter` instead of calling methods that might not be supported.
//!
//! # Isolation Contract
//! - A backend sees the (masked) record, the job and the instruction only
//! - A backend never sees another backend's result, except the arbiter
//! - Backends are not assumed deterministic

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tribunal_core::{CandidateRecord, EvaluationResult, EvaluatorInput, JobSpecification, ValidationError};

use crate::providers::ProviderError;
use crate::resilience::Usage;

mod invocation;
mod llm;
mod registry;

pub use invocation::{
    arbitrate_with, evaluate_with, extract_with, invoke, EvaluatorInvocation, InvocationStatus, Invoked,
};
pub use llm::{strip_code_fences, LlmEvaluator};
pub use registry::{EvaluatorRegistry, EvaluatorRegistryBuilder};

/// Errors from one evaluator call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluatorError {
    #[error("provider call failed: {0}")]
    Provider(#[from] ProviderError),

    /// The call completed but its output was unusable.
    #[error("invalid output: {error}")]
    InvalidOutput {
        error: ValidationError,
        usage: Usage,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("capability not supported: {0}")]
    Unsupported(&'static str),

    #[error("evaluator task crashed: {0}")]
    Crashed(String),
}

impl EvaluatorError {
    pub fn invalid(error: ValidationError, usage: Usage) -> Self {
        EvaluatorError::InvalidOutput { error, usage }
    }

    /// Usage spent before the failure, when the backend knows it.
    pub fn usage(&self) -> Option<&Usage> {
        match self {
            EvaluatorError::InvalidOutput { usage, .. } => Some(usage),
            _ => None,
        }
    }
}

/// A value together with what it cost to produce.
#[derive(Debug, Clone, PartialEq)]
pub struct Billed<T> {
    pub value: T,
    pub usage: Usage,
}

impl<T> Billed<T> {
    pub fn new(value: T, usage: Usage) -> Self {
        Self { value, usage }
    }

    /// A value that cost nothing to produce.
    pub fn free(value: T) -> Self {
        Self {
            value,
            usage: Usage::default(),
        }
    }
}

/// Everything one evaluation call receives.
///
/// Cheap to clone, so one request can be handed to several concurrent tasks.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub input: Arc<EvaluatorInput>,
    pub job: Arc<JobSpecification>,

    /// Organization instruction resolved for the configured domain
    pub instruction: Option<Arc<str>>,
}

/// What the arbiter receives: raw results, never the aggregate.
#[derive(Debug, Clone)]
pub struct ArbitrationRequest {
    pub results: BTreeMap<String, EvaluationResult>,
    pub job: Arc<JobSpecification>,
    pub instruction: Option<Arc<str>>,
}

/// The arbiter's answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArbiterVerdict {
    pub result: EvaluationResult,
    pub justification: String,

    /// Field name to the reason for the value chosen
    #[serde(default)]
    pub resolutions: BTreeMap<String, String>,
}

/// An evaluator backend.
#[async_trait]
pub trait EvaluatorBackend: Send + Sync {
    /// Name used in weight tables, traces and the audit snapshot.
    fn name(&self) -> &str;

    /// Model identity recorded with each call.
    fn model(&self) -> &str;

    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<Billed<EvaluationResult>, EvaluatorError>;

    fn as_extractor(&self) -> Option<&dyn Extractor> {
        None
    }

    fn as_arbiter(&self) -> Option<&dyn Arbiter> {
        None
    }
}

/// Turns raw input into a structured record.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, raw: &str) -> Result<Billed<CandidateRecord>, EvaluatorError>;
}

/// Resolves disagreement between evaluators.
#[async_trait]
pub trait Arbiter: Send + Sync {
    async fn arbitrate(
        &self,
        request: &ArbitrationRequest,
    ) -> Result<Billed<ArbiterVerdict>, EvaluatorError>;
}
