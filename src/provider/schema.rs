//! Schema normalization for provider-specific tool parameters.
//!
//! Strict mode backends require every declared property to be present and
//! forbid undeclared ones. Optional properties are rewritten as required but
//! nullable, and the nulls are stripped again when the call is parsed, so a
//! caller that omits a field still means "omitted".

use serde_json::{Map, Value};

/// Normalize a JSON schema for a specific provider.
pub fn normalize_schema_for_provider(schema: &Value, provider_name: &str) -> Value {
    match provider_name {
        "openai" => ensure_additional_properties_false(schema),
        _ => schema.clone(),
    }
}

/// Rewrite a schema into strict form: all properties required, optional ones
/// nullable, `additionalProperties: false` on every object.
pub fn to_strict_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(obj) => {
            let mut strict = Map::new();
            for (key, value) in obj {
                let next = match key.as_str() {
                    "properties" | "required" => continue,
                    "items" => to_strict_schema(value),
                    "anyOf" | "oneOf" | "allOf" => match value {
                        Value::Array(variants) => {
                            Value::Array(variants.iter().map(to_strict_schema).collect())
                        }
                        other => other.clone(),
                    },
                    _ => value.clone(),
                };
                strict.insert(key.clone(), next);
            }

            if let Some(Value::Object(properties)) = obj.get("properties") {
                let required = required_set(obj);
                let mut strict_props = Map::new();
                // originally required names first, in their declared order
                let mut all_required: Vec<Value> = required
                    .iter()
                    .filter(|r| properties.contains_key(r.as_str()))
                    .map(|r| Value::String(r.clone()))
                    .collect();
                for (name, prop) in properties {
                    let mut prop = to_strict_schema(prop);
                    if !required.iter().any(|r| r == name) {
                        prop = make_nullable(prop);
                        all_required.push(Value::String(name.clone()));
                    }
                    strict_props.insert(name.clone(), prop);
                }
                strict.insert("properties".into(), Value::Object(strict_props));
                strict.insert("required".into(), Value::Array(all_required));
            }

            if is_object_schema(schema) {
                strict.insert("additionalProperties".into(), Value::Bool(false));
            }
            Value::Object(strict)
        }
        _ => schema.clone(),
    }
}

/// Inverse of [`to_strict_schema`]: nullable properties become optional
/// again with the null variant removed.
pub fn relax_strict_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(obj) => {
            let mut relaxed = Map::new();
            for (key, value) in obj {
                let next = match key.as_str() {
                    "properties" | "required" => continue,
                    "items" => relax_strict_schema(value),
                    _ => value.clone(),
                };
                relaxed.insert(key.clone(), next);
            }

            if let Some(Value::Object(properties)) = obj.get("properties") {
                let required = required_set(obj);
                let mut relaxed_props = Map::new();
                let mut still_required = Vec::new();
                for (name, prop) in properties {
                    let (prop, was_nullable) = strip_nullable(prop);
                    relaxed_props.insert(name.clone(), relax_strict_schema(&prop));
                    if required.iter().any(|r| r == name) && !was_nullable {
                        still_required.push(Value::String(name.clone()));
                    }
                }
                relaxed.insert("properties".into(), Value::Object(relaxed_props));
                relaxed.insert("required".into(), Value::Array(still_required));
            }
            Value::Object(relaxed)
        }
        _ => schema.clone(),
    }
}

/// Remove null values the backend sent for properties the original schema
/// marks optional. Recurses into nested object properties.
pub fn strip_null_optionals(args: &mut Map<String, Value>, original: &Value) {
    let Value::Object(schema) = original else {
        return;
    };
    let Some(Value::Object(properties)) = schema.get("properties") else {
        return;
    };
    let required = required_set(schema);

    args.retain(|name, value| {
        !(value.is_null()
            && properties.contains_key(name)
            && !required.iter().any(|r| r == name))
    });

    for (name, value) in args.iter_mut() {
        if let (Value::Object(nested), Some(sub_schema)) = (value, properties.get(name)) {
            strip_null_optionals(nested, sub_schema);
        }
    }
}

fn required_set(obj: &Map<String, Value>) -> Vec<String> {
    obj.get("required")
        .and_then(|r| r.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn make_nullable(prop: Value) -> Value {
    let Value::Object(mut obj) = prop else {
        return prop;
    };
    match obj.get("type").cloned() {
        Some(Value::String(t)) if t != "null" => {
            obj.insert(
                "type".into(),
                Value::Array(vec![Value::String(t), Value::String("null".into())]),
            );
        }
        Some(Value::Array(mut types)) => {
            if !types.iter().any(|t| t == "null") {
                types.push(Value::String("null".into()));
            }
            obj.insert("type".into(), Value::Array(types));
        }
        Some(_) => {}
        None => {
            return serde_json::json!({
                "anyOf": [Value::Object(obj), {"type": "null"}]
            });
        }
    }
    if let Some(Value::Array(variants)) = obj.get_mut("enum") {
        if !variants.iter().any(Value::is_null) {
            variants.push(Value::Null);
        }
    }
    Value::Object(obj)
}

/// Returns the property without its null variant, and whether it had one.
fn strip_nullable(prop: &Value) -> (Value, bool) {
    let Value::Object(obj) = prop else {
        return (prop.clone(), false);
    };

    if let Some(Value::Array(variants)) = obj.get("anyOf") {
        if obj.len() == 1 && variants.len() == 2 {
            if let Some(pos) = variants.iter().position(|v| v.get("type") == Some(&Value::from("null"))) {
                return (variants[1 - pos].clone(), true);
            }
        }
    }

    let mut obj = obj.clone();
    let mut nullable = false;
    if let Some(Value::Array(types)) = obj.get("type").cloned() {
        if types.iter().any(|t| t == "null") {
            nullable = true;
            let rest: Vec<Value> = types.into_iter().filter(|t| t != "null").collect();
            let collapsed = if rest.len() == 1 {
                rest.into_iter().next().unwrap_or(Value::Null)
            } else {
                Value::Array(rest)
            };
            obj.insert("type".into(), collapsed);
        }
    }
    if nullable {
        if let Some(Value::Array(variants)) = obj.get_mut("enum") {
            variants.retain(|v| !v.is_null());
        }
    }
    (Value::Object(obj), nullable)
}

fn ensure_additional_properties_false(schema: &Value) -> Value {
    match schema {
        Value::Object(obj) => {
            let mut normalized = Map::new();
            for (key, value) in obj {
                let next = match key.as_str() {
                    "properties" => ensure_properties_additional_false(value),
                    _ => ensure_additional_properties_false(value),
                };
                normalized.insert(key.clone(), next);
            }
            if is_object_schema(schema) {
                normalized
                    .entry("additionalProperties")
                    .or_insert(Value::Bool(false));
            }
            Value::Object(normalized)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(ensure_additional_properties_false)
                .collect(),
        ),
        _ => schema.clone(),
    }
}

fn ensure_properties_additional_false(schema: &Value) -> Value {
    if let Value::Object(properties) = schema {
        let mut normalized = Map::new();
        for (key, value) in properties {
            normalized.insert(key.clone(), ensure_additional_properties_false(value));
        }
        Value::Object(normalized)
    } else {
        ensure_additional_properties_false(schema)
    }
}

fn is_object_schema(value: &Value) -> bool {
    if let Value::Object(obj) = value {
        match obj.get("type") {
            Some(Value::String(t)) => t == "object",
            Some(Value::Array(types)) => types.iter().any(|t| t == "object"),
            _ => false,
        }
    } else {
        false
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
                "path": {"type": "string"},
                "limit": {"type": "integer"},
                "mode": {"type": "string", "enum": ["fast", "slow"]}
            },
            "required": ["path"]
        })
    }

    #[test]
    fn normalize_schema_adds_additional_properties_for_openai() {
        let schema = json!({
            "type": "object",
            "properties": {
                "ok": {"type": "boolean"}
            },
            "required": ["ok"]
        });
        let normalized = normalize_schema_for_provider(&schema, "openai");
        assert_eq!(normalized["additionalProperties"], false);
    }

    #[test]
    fn strict_schema_requires_everything_and_nulls_optionals() {
        let strict = to_strict_schema(&read_schema());
        assert_eq!(strict["required"], json!(["path", "limit", "mode"]));
        assert_eq!(strict["properties"]["path"]["type"], "string");
        assert_eq!(strict["properties"]["limit"]["type"], json!(["integer", "null"]));
        assert_eq!(strict["properties"]["mode"]["enum"], json!(["fast", "slow", null]));
        assert_eq!(strict["additionalProperties"], false);
    }

    #[test]
    fn strict_schema_recurses_into_nested_objects() {
        let schema = json!({
            "type": "object",
            "properties": {
                "opts": {
                    "type": "object",
                    "properties": {"depth": {"type": "number"}}
                }
            }
        });
        let strict = to_strict_schema(&schema);
        let opts = &strict["properties"]["opts"];
        assert_eq!(opts["type"], json!(["object", "null"]));
        assert_eq!(opts["additionalProperties"], false);
        assert_eq!(opts["properties"]["depth"]["type"], json!(["number", "null"]));
    }

    #[test]
    fn untyped_optional_is_wrapped_in_any_of() {
        let schema = json!({
            "type": "object",
            "properties": {"value": {"description": "anything"}}
        });
        let strict = to_strict_schema(&schema);
        assert_eq!(strict["properties"]["value"]["anyOf"][1], json!({"type": "null"}));
        let relaxed = relax_strict_schema(&strict);
        assert_eq!(relaxed["properties"]["value"], json!({"description": "anything"}));
    }

    #[test]
    fn relax_restores_optionality() {
        let relaxed = relax_strict_schema(&to_strict_schema(&read_schema()));
        assert_eq!(relaxed["required"], json!(["path"]));
        assert_eq!(relaxed["properties"]["limit"]["type"], "integer");
        assert_eq!(relaxed["properties"]["mode"]["enum"], json!(["fast", "slow"]));
    }

    #[test]
    fn null_optionals_are_stripped_but_required_nulls_kept() {
        let mut args = json!({"path": null, "limit": null, "mode": "fast"})
            .as_object()
            .cloned()
            .unwrap();
        strip_null_optionals(&mut args, &read_schema());
        assert!(args.contains_key("path"));
        assert!(!args.contains_key("limit"));
        assert_eq!(args["mode"], "fast");
    }
}
