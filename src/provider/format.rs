//! Provider formatting helpers.

use serde_json::{Map, Value};
use tracing::warn;

/// Marker used to carry the error flag through protocols that have none.
pub const ERROR_PREFIX: &str = "Error: ";

/// Convert a tool result JSON value into a string payload for providers.
pub(crate) fn tool_result_to_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Encode a tool result for a protocol without an error flag.
pub(crate) fn encode_flagged_result(content: &str, is_error: bool) -> String {
    if is_error {
        format!("{ERROR_PREFIX}{content}")
    } else {
        content.to_string()
    }
}

/// Inverse of [`encode_flagged_result`].
pub(crate) fn decode_flagged_result(content: &str) -> (String, bool) {
    match content.strip_prefix(ERROR_PREFIX) {
        Some(rest) => (rest.to_string(), true),
        None => (content.to_string(), false),
    }
}

/// Parse tool-call arguments delivered as a JSON string. Anything that is not
/// a JSON object becomes an empty map.
pub(crate) fn parse_arguments(tool_name: &str, raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(tool = tool_name, kind = ?other, "tool arguments are not an object; using empty input");
            Map::new()
        }
        Err(e) => {
            warn!(tool = tool_name, error = %e, "unparseable tool arguments; using empty input");
            Map::new()
        }
    }
}

/// Convert structured arguments from a value, tolerating non-objects.
pub(crate) fn object_or_empty(tool_name: &str, value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(raw)) => parse_arguments(tool_name, raw),
        None | Some(Value::Null) => Map::new(),
        Some(other) => {
            warn!(tool = tool_name, kind = ?other, "tool input is not an object; using empty input");
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_prefix_round_trips() {
        let encoded = encode_flagged_result("file not found", true);
        assert_eq!(encoded, "Error: file not found");
        assert_eq!(decode_flagged_result(&encoded), ("file not found".to_string(), true));
        assert_eq!(decode_flagged_result("fine"), ("fine".to_string(), false));
    }

    #[test]
    fn malformed_arguments_become_empty() {
        assert!(parse_arguments("Read", "{\"path\": ").is_empty());
        assert!(parse_arguments("Read", "[1,2]").is_empty());
        assert_eq!(parse_arguments("Read", "{\"path\":\"a\"}")["path"], "a");
    }

    #[test]
    fn tool_result_strings() {
        assert_eq!(tool_result_to_string(&json!("plain")), "plain");
        assert_eq!(tool_result_to_string(&json!({"a": 1})), "{\"a\":1}");
    }
}
