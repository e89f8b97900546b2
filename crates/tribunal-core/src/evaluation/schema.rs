//! JSON Schema validation for evaluator output.
//!
//! Raw evaluator JSON is checked against `schema/evaluation_result.schema.json`
//! before it is deserialized, so structurally malformed output is rejected
//! with a readable error list instead of a serde message.

use std::sync::OnceLock;

/// Embedded result schema (loaded at compile time).
const RESULT_SCHEMA_JSON: &str = include_str!("../../schema/evaluation_result.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

fn get_validator() -> Result<&'static jsonschema::Validator, String> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(RESULT_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result.as_ref().map_err(Clone::clone)
}

/// Validate an evaluator result JSON value against the schema.
///
/// Returns every violation as `"<message> at <instance path>"`.
pub fn validate_result_schema(value: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e])?;

    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check if a value is a schema-valid evaluator result.
pub fn is_valid_result(value: &serde_json::Value) -> bool {
    get_validator()
        .map(|v| v.is_valid(value))
        .unwrap_or(false)
}
