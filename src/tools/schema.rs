use serde_json::Value;

/// Checks tool arguments against the tool's JSON Schema.
///
/// The error lists every violation, so a missing required property shows
/// up by name.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let validator = jsonschema::Validator::new(schema)
        .map_err(|e| format!("invalid tool schema: {}", e))?;

    if validator.is_valid(arguments) {
        return Ok(());
    }

    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| e.to_string())
        .collect();
    Err(errors.join("; "))
}
