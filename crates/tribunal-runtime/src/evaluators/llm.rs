//! Evaluator backend over a chat-completion provider.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tribunal_core::{parse_result, parse_result_str, CandidateRecord, EvaluationResult, ValidationError};

use super::{
    Arbiter, ArbiterVerdict, ArbitrationRequest, Billed, EvaluationRequest, EvaluatorBackend,
    EvaluatorError, Extractor,
};
use crate::config::EvaluatorConfig;
use crate::prompts;
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider};
use crate::resilience::{retry_transient, RetrySettings, Usage};

/// Remove a surrounding Markdown code fence and any prose around the JSON object.
pub fn strip_code_fences(content: &str) -> &str {
    let mut text = content.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string ("json") on the fence line
        text = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
        text = text.trim_end().strip_suffix("```").unwrap_or(text).trim();
    }
    if !text.starts_with('{') {
        if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
            if start < end {
                return &text[start..=end];
            }
        }
    }
    text
}

pub struct LlmEvaluator {
    name: String,
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
    retry: RetrySettings,
    extraction: bool,
    arbitration: bool,
}

impl std::fmt::Debug for LlmEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmEvaluator")
            .field("name", &self.name)
            .field("provider", &self.provider.name())
            .field("model", &self.completion.model)
            .field("extraction", &self.extraction)
            .field("arbitration", &self.arbitration)
            .finish()
    }
}

impl LlmEvaluator {
    pub fn new(name: impl Into<String>, provider: Arc<dyn LlmProvider>, completion: CompletionConfig) -> Self {
        Self {
            name: name.into(),
            provider,
            completion,
            retry: RetrySettings::default(),
            extraction: false,
            arbitration: false,
        }
    }

    pub fn from_config(config: &EvaluatorConfig, provider: Arc<dyn LlmProvider>, retry: RetrySettings) -> Self {
        let completion = CompletionConfig {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            ..Default::default()
        };
        let mut evaluator = Self::new(config.name.clone(), provider, completion).with_retry(retry);
        evaluator.extraction = config.extractor;
        evaluator.arbitration = config.arbiter;
        evaluator
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_extraction(mut self) -> Self {
        self.extraction = true;
        self
    }

    pub fn with_arbitration(mut self) -> Self {
        self.arbitration = true;
        self
    }

    /// One completion with transient retries; returns the text and its cost.
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<(String, Usage), EvaluatorError> {
        let response = retry_transient(&self.retry, &self.name, || {
            self.provider.complete(messages.clone(), &self.completion)
        })
        .await?;
        let usage = Usage::priced(response.usage, &response.model);
        Ok((response.content, usage))
    }
}

fn malformed(e: serde_json::Error) -> ValidationError {
    ValidationError::Malformed(e.to_string())
}

fn parse_verdict(content: &str) -> Result<ArbiterVerdict, ValidationError> {
    let value: Value = serde_json::from_str(strip_code_fences(content)).map_err(malformed)?;
    let result = parse_result(&value["result"])?;
    let justification = value["justification"]
        .as_str()
        .ok_or_else(|| ValidationError::Deserialize("missing 'justification'".to_string()))?
        .to_string();
    let resolutions = match value.get("resolutions") {
        None | Some(Value::Null) => Default::default(),
        Some(r) => serde_json::from_value(r.clone())
            .map_err(|e| ValidationError::Deserialize(format!("resolutions: {}", e)))?,
    };
    Ok(ArbiterVerdict {
        result,
        justification,
        resolutions,
    })
}

#[async_trait]
impl EvaluatorBackend for LlmEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.completion.model
    }

    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<Billed<EvaluationResult>, EvaluatorError> {
        let messages = prompts::evaluation_messages(
            &request.input,
            &request.job,
            request.instruction.as_deref(),
        )
        .map_err(|e| EvaluatorError::invalid(ValidationError::Malformed(e.to_string()), Usage::default()))?;

        let (content, usage) = self.complete(messages).await?;
        match parse_result_str(strip_code_fences(&content)) {
            Ok(result) => Ok(Billed::new(result, usage)),
            Err(error) => Err(EvaluatorError::invalid(error, usage)),
        }
    }

    fn as_extractor(&self) -> Option<&dyn Extractor> {
        self.extraction.then_some(self as &dyn Extractor)
    }

    fn as_arbiter(&self) -> Option<&dyn Arbiter> {
        self.arbitration.then_some(self as &dyn Arbiter)
    }
}

#[async_trait]
impl Extractor for LlmEvaluator {
    async fn extract(&self, raw: &str) -> Result<Billed<CandidateRecord>, EvaluatorError> {
        let (content, usage) = self.complete(prompts::extraction_messages(raw)).await?;
        match serde_json::from_str::<CandidateRecord>(strip_code_fences(&content)) {
            Ok(record) => Ok(Billed::new(record, usage)),
            Err(e) => Err(EvaluatorError::invalid(ValidationError::Deserialize(e.to_string()), usage)),
        }
    }
}

#[async_trait]
impl Arbiter for LlmEvaluator {
    async fn arbitrate(
        &self,
        request: &ArbitrationRequest,
    ) -> Result<Billed<ArbiterVerdict>, EvaluatorError> {
        let messages = prompts::arbitration_messages(
            &request.results,
            &request.job,
            request.instruction.as_deref(),
        )
        .map_err(|e| EvaluatorError::invalid(ValidationError::Malformed(e.to_string()), Usage::default()))?;

        let (content, usage) = self.complete(messages).await?;
        match parse_verdict(&content) {
            Ok(verdict) => Ok(Billed::new(verdict, usage)),
            Err(error) => Err(EvaluatorError::invalid(error, usage)),
        }
    }
}
