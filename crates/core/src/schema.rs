//! Argument validation against a tool's declared input schema.

use serde_json::Value;

use crate::error::ToolError;

/// Check `arguments` against `schema`.
///
/// Every violation is reported, joined with `; `. A schema that does not
/// compile is the tool's fault, not the model's, and comes back as
/// [`ToolError::InvalidSchema`].
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), ToolError> {
    let validator =
        jsonschema::Validator::new(schema).map_err(|e| ToolError::InvalidSchema(e.to_string()))?;
    if validator.is_valid(arguments) {
        return Ok(());
    }
    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| e.to_string())
        .collect();
    Err(ToolError::InvalidArguments(errors.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "max_results": { "type": "integer" },
                "topic": { "type": "string", "enum": ["general", "news"] }
            },
            "required": ["query"]
        })
    }

    fn nested_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "opts": { "type": "object", "required": ["k"] },
                "tags": { "type": "array", "items": { "type": "string" } },
                "n": { "type": "integer", "minimum": 1 }
            }
        })
    }

    fn invalid(schema: &Value, args: Value) -> String {
        match validate_arguments(schema, &args) {
            Err(ToolError::InvalidArguments(msg)) => msg,
            other => panic!("expected InvalidArguments, got {other:?}"),
        }
    }

    #[test]
    fn accepts_valid_arguments() {
        let args = json!({"query": "rust", "max_results": 2, "topic": "news"});
        assert!(validate_arguments(&search_schema(), &args).is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        let msg = invalid(&search_schema(), json!({"max_results": 2}));
        assert!(msg.contains("query"));
    }

    #[test]
    fn rejects_wrong_type() {
        let msg = invalid(&search_schema(), json!({"query": 5}));
        assert!(msg.contains("string"));
    }

    #[test]
    fn float_is_not_an_integer() {
        let msg = invalid(&search_schema(), json!({"query": "x", "max_results": 1.5}));
        assert!(msg.contains("integer"));
    }

    #[test]
    fn rejects_value_outside_enum() {
        let msg = invalid(&search_schema(), json!({"query": "x", "topic": "sports"}));
        assert!(msg.contains("sports"));
    }

    #[test]
    fn rejects_non_object_root() {
        invalid(&search_schema(), json!("query"));
    }

    #[test]
    fn extra_keys_are_allowed() {
        let args = json!({"query": "x", "unexpected": true});
        assert!(validate_arguments(&search_schema(), &args).is_ok());
    }

    #[test]
    fn nested_required_is_enforced() {
        let msg = invalid(&nested_schema(), json!({"opts": {}}));
        assert!(msg.contains("k"));
    }

    #[test]
    fn array_items_are_checked() {
        let msg = invalid(&nested_schema(), json!({"opts": {"k": "a"}, "tags": [1, 2]}));
        assert!(msg.contains("string"));
    }

    #[test]
    fn numeric_bounds_are_checked() {
        let msg = invalid(&nested_schema(), json!({"opts": {"k": "a"}, "n": -5}));
        assert!(msg.contains("minimum"));
    }

    #[test]
    fn all_violations_are_reported() {
        let msg = invalid(&nested_schema(), json!({"opts": {}, "tags": [1], "n": 0}));
        assert_eq!(msg.split("; ").count(), 3);
    }

    #[test]
    fn broken_schema_is_a_schema_error() {
        let err = validate_arguments(&json!({"type": "banana"}), &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidSchema(_)));
    }
}
