//! Structural and range validation of evaluator results.
//!
//! A result that fails validation is that evaluator's failure, never a
//! pipeline failure. There is no best-effort repair.

use thiserror::Error;

use super::{EvaluationResult, Point};

/// Errors from result validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Output is not valid JSON: {0}")]
    Malformed(String),

    #[error("Schema violations: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("Failed to deserialize result: {0}")]
    Deserialize(String),

    #[error("Field {field} out of range: {value}")]
    OutOfRange { field: String, value: f64 },

    #[error("Inconsistent result: {0}")]
    Inconsistent(String),
}

/// Parse and validate a result from a JSON string.
pub fn parse_result_str(json: &str) -> Result<EvaluationResult, ValidationError> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    parse_result(&value)
}

/// Parse and validate a result from a JSON value.
///
/// # Validation Steps
/// 1. JSON schema compliance (required fields, enums, score ranges)
/// 2. Deserialization into the typed result
/// 3. Range and consistency checks via [`validate_result`]
pub fn parse_result(value: &serde_json::Value) -> Result<EvaluationResult, ValidationError> {
    super::validate_result_schema(value).map_err(ValidationError::Schema)?;

    let result: EvaluationResult = serde_json::from_value(value.clone())
        .map_err(|e| ValidationError::Deserialize(e.to_string()))?;

    validate_result(&result)?;
    Ok(result)
}

/// Range and consistency checks on a typed result.
pub fn validate_result(result: &EvaluationResult) -> Result<(), ValidationError> {
    check_score("overall_score", result.overall_score)?;
    for (field, value) in result.subscores.named() {
        check_score(field, value)?;
    }
    if let Some(years) = result.subscores.experience_years {
        if !years.is_finite() || years < 0.0 {
            return Err(ValidationError::OutOfRange {
                field: "subscores.experience_years".to_string(),
                value: years,
            });
        }
    }

    if result.meets_all_mandatory && !result.failed_rules.is_empty() {
        return Err(ValidationError::Inconsistent(format!(
            "meets_all_mandatory is true but {} rule(s) failed",
            result.failed_rules.len()
        )));
    }
    if let Some(rule) = result.failed_rules.iter().find(|r| r.rule_id.trim().is_empty()) {
        return Err(ValidationError::Inconsistent(format!(
            "failed rule with empty id (reason: {})",
            rule.reason
        )));
    }

    check_points("strengths", &result.strengths)?;
    check_points("improvements", &result.improvements)?;
    Ok(())
}

fn check_score(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
        })
    }
}

fn check_points(section: &str, points: &[Point]) -> Result<(), ValidationError> {
    match points.iter().position(|p| p.point.trim().is_empty()) {
        Some(i) => Err(ValidationError::Inconsistent(format!(
            "{}[{}] has empty text",
            section, i
        ))),
        None => Ok(()),
    }
}
