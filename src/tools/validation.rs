//! Validate tool call arguments against JSON Schema before execution.

use serde_json::Value;

/// Validate tool arguments against a JSON Schema.
///
/// Top-level only: object shape, required field presence, declared property
/// types (including `["integer", "null"]` unions) and string enums.
/// Returns the first violation found.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err(format!(
            "expected object arguments, got {}",
            json_type_name(args)
        ));
    }
    let Some(obj) = args.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        if let Some(name) = required
            .iter()
            .filter_map(Value::as_str)
            .find(|name| !obj.contains_key(*name))
        {
            return Err(format!("missing required field '{name}'"));
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (key, value) in obj {
        let Some(prop_schema) = properties.get(key) else {
            continue;
        };
        let allowed = allowed_types(prop_schema);
        if !allowed.is_empty() && !allowed.iter().any(|t| value_matches_type(value, t)) {
            return Err(format!(
                "field '{}' expected type '{}', got {}",
                key,
                allowed.join("|"),
                json_type_name(value)
            ));
        }
        if let (Some(options), Some(s)) = (
            prop_schema.get("enum").and_then(Value::as_array),
            value.as_str(),
        ) {
            if !options.iter().any(|o| o.as_str() == Some(s)) {
                return Err(format!("field '{key}' must be one of {}", Value::Array(options.clone())));
            }
        }
    }

    Ok(())
}

fn allowed_types(prop_schema: &Value) -> Vec<&str> {
    match prop_schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn read_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "limit": { "type": ["integer", "null"] },
                "mode": { "type": "string", "enum": ["fast", "slow"] },
            },
            "required": ["path"],
        })
    }

    #[test]
    fn rejects_non_object_args_when_schema_expects_object() {
        let err = validate_arguments(&json!("not an object"), &read_schema()).unwrap_err();
        assert!(err.contains("expected object"));
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = validate_arguments(&json!({}), &read_schema()).unwrap_err();
        assert!(err.contains("missing required field 'path'"));
    }

    #[test]
    fn accepts_optional_field_when_absent() {
        assert!(validate_arguments(&json!({ "path": "a.txt" }), &read_schema()).is_ok());
    }

    #[test]
    fn rejects_field_with_wrong_type() {
        let err = validate_arguments(&json!({ "path": 42 }), &read_schema()).unwrap_err();
        assert!(err.contains("field 'path'"));
        assert!(err.contains("expected type 'string'"));
    }

    #[test]
    fn type_unions_accept_any_member() {
        let schema = read_schema();
        assert!(validate_arguments(&json!({ "path": "a", "limit": null }), &schema).is_ok());
        assert!(validate_arguments(&json!({ "path": "a", "limit": 3 }), &schema).is_ok());
        assert!(validate_arguments(&json!({ "path": "a", "limit": 3.0 }), &schema).is_ok());
        assert!(validate_arguments(&json!({ "path": "a", "limit": "3" }), &schema).is_err());
    }

    #[test]
    fn enum_values_are_checked() {
        let schema = read_schema();
        assert!(validate_arguments(&json!({ "path": "a", "mode": "fast" }), &schema).is_ok());
        let err = validate_arguments(&json!({ "path": "a", "mode": "warp" }), &schema).unwrap_err();
        assert!(err.contains("must be one of"));
    }

    #[test]
    fn accepts_extra_fields_not_in_schema_properties() {
        assert!(validate_arguments(&json!({ "path": "a", "extra": true }), &read_schema()).is_ok());
    }

    #[test]
    fn accepts_anything_when_schema_is_empty_object() {
        assert!(validate_arguments(&json!({ "anything": 42 }), &json!({})).is_ok());
        assert!(validate_arguments(&Value::Null, &json!({})).is_ok());
    }
}
