//! Prompts for LLM-backed evaluators.
//!
//! Layout per call:
//! 1. Role prompt (evaluate, arbitrate or extract), constant
//! 2. Organization instruction for the domain, if any
//! 3. Job specification and record as JSON, per request

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tribunal_core::{EvaluationResult, EvaluatorInput, JobSpecification};

use crate::providers::ChatMessage;

/// Evaluator role prompt.
///
/// The output contract mirrors the embedded result schema; anything else is
/// rejected by validation and counted as this evaluator's failure.
pub const EVALUATOR_SYSTEM_PROMPT: &str = r#"
You are an evaluator screening one candidate record against one job specification.

## Rules
1. Judge ONLY against the job specification you are given
2. Every strength, improvement and failed rule cites evidence from the record
3. Evidence is a literal quote plus its path, e.g. "experiences[0].missions[1]"
4. Never invent experience, dates or skills that are not in the record
5. When the record only shows a subset, do not assume missing sections are empty

## Scoring
- subscores.experience: relevant years normalized against years_for_full_score, 0-100
  (adjacent experience counts at the adjacent discount)
- subscores.skills_match: coverage of required skills, 0-100
- subscores.nice_to_have: coverage of nice-to-have skills, 0-100
- overall_score: weighted by the job's scoring weights, 0-100
- recommendation: "shortlist" at or above shortlist_min, "consider" at or above
  consider_min, otherwise "reject"; "reject" whenever a mandatory rule fails

## Output Format (JSON only, no prose)
{
  "meets_all_mandatory": true,
  "failed_rules": [{"rule_id": "M1", "reason": "string", "evidence": [{"quote": "string", "path": "string"}]}],
  "relevance_summary": {
    "months": {"direct": 0, "adjacent": 0, "peripheral": 0, "irrelevant": 0},
    "by_experience": [{"experience_index": 0, "title": "string",
      "category": "direct" | "adjacent" | "peripheral" | "irrelevant",
      "evidence": [{"quote": "string", "path": "string"}]}]
  },
  "subscores": {"experience": 0, "skills_match": 0, "nice_to_have": 0, "experience_years": 0.0},
  "overall_score": 0,
  "recommendation": "shortlist" | "consider" | "reject",
  "strengths": [{"point": "string", "evidence": [{"quote": "string", "path": "string"}]}],
  "improvements": [{"point": "string", "evidence": []}]
}
"#;

/// Arbiter role prompt.
pub const ARBITER_SYSTEM_PROMPT: &str = r#"
You are the arbiter between independent evaluators who disagree about one candidate.

You receive each evaluator's complete result and the job specification.
You do not receive any blended score. Re-derive the decision from the evidence
the evaluators cite; do not average them.

## Rules
1. Prefer findings backed by more specific evidence
2. A mandatory rule fails only if an evaluator cites evidence of the failure
3. Your result must be complete; it replaces the evaluators' results

## Output Format (JSON only, no prose)
{
  "result": { ...a complete evaluation result in the evaluator format... },
  "justification": "two or three sentences",
  "resolutions": {"field name": "why you chose this value"}
}
"#;

/// Extraction role prompt.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"
You convert an unstructured candidate document into a structured record.

## Rules
1. Copy text; do not summarize or rephrase missions
2. Dates become "YYYY-MM"; an ongoing position has no "end"
3. Omit any field the document does not state

## Output Format (JSON only, no prose)
{
  "identity": {"subject_id": "string", "full_name": "string", "email": "string",
               "phone": "string", "location": "string", "headline": "string"},
  "experiences": [{"title": "string", "employer": "string", "start": "YYYY-MM",
                   "end": "YYYY-MM", "missions": ["string"]}],
  "education": [{"degree": "string", "institution": "string", "field": "string", "year": 2020}],
  "skills": ["string"],
  "languages": [{"name": "string", "level": "string"}],
  "certifications": [{"name": "string", "issuer": "string", "year": 2020}]
}
"#;

/// Organization-specific instruction text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstructionSettings {
    /// Used when no domain-specific text exists
    #[serde(default)]
    pub general: Option<String>,

    /// Keyed by domain, e.g. `candidate-screening`
    #[serde(default)]
    pub domains: BTreeMap<String, String>,
}

/// Instruction text for `domain_key`.
///
/// Returns the domain-specific text when it exists and is not blank, else the
/// general text when it is not blank, else `None`.
pub fn resolve_instruction<'a>(settings: &'a InstructionSettings, domain_key: &str) -> Option<&'a str> {
    let non_blank = |text: &'a String| Some(text.as_str()).filter(|t| !t.trim().is_empty());
    settings
        .domains
        .get(domain_key)
        .and_then(non_blank)
        .or_else(|| settings.general.as_ref().and_then(non_blank))
}

fn with_instruction(role_prompt: &str, instruction: Option<&str>) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(role_prompt.trim())];
    if let Some(text) = instruction {
        messages.push(ChatMessage::system(format!("## Organization Instruction\n{}", text.trim())));
    }
    messages
}

pub fn evaluation_messages(
    input: &EvaluatorInput,
    job: &JobSpecification,
    instruction: Option<&str>,
) -> Result<Vec<ChatMessage>, serde_json::Error> {
    let scope = if input.is_packed() {
        "The record below is the most relevant subset of the full record. Index paths into the record exactly as shown."
    } else {
        "The record below is complete."
    };
    let mut messages = with_instruction(EVALUATOR_SYSTEM_PROMPT, instruction);
    messages.push(ChatMessage::user(format!(
        "## Job Specification\n{}\n\n## Candidate Record\n{}\n{}",
        serde_json::to_string_pretty(job)?,
        scope,
        serde_json::to_string_pretty(input.record())?,
    )));
    Ok(messages)
}

pub fn arbitration_messages(
    results: &BTreeMap<String, EvaluationResult>,
    job: &JobSpecification,
    instruction: Option<&str>,
) -> Result<Vec<ChatMessage>, serde_json::Error> {
    let mut messages = with_instruction(ARBITER_SYSTEM_PROMPT, instruction);
    messages.push(ChatMessage::user(format!(
        "## Job Specification\n{}\n\n## Evaluator Results\n{}",
        serde_json::to_string_pretty(job)?,
        serde_json::to_string_pretty(results)?,
    )));
    Ok(messages)
}

pub fn extraction_messages(raw: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(EXTRACTION_SYSTEM_PROMPT.trim()),
        ChatMessage::user(format!("## Document\n{}", raw)),
    ]
}
