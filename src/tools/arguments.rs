//! Typed access to tool call arguments.

use serde_json::{Map, Value};

use crate::error::ConductorError;

/// Wrapper around tool call arguments providing typed extraction.
#[derive(Debug, Clone)]
pub struct ToolArguments {
    value: Value,
}

impl ToolArguments {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            value: Value::Object(map),
        }
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &Value {
        &self.value
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str, ConductorError> {
        self.value
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing("string", key))
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(|v| v.as_str())
    }

    /// Get an integer argument.
    pub fn get_i64(&self, key: &str) -> Result<i64, ConductorError> {
        self.value
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| missing("integer", key))
    }

    /// Optional integer. Whole-valued floats are accepted since some models
    /// send `10.0` for integer fields.
    pub fn get_u64_opt(&self, key: &str) -> Option<u64> {
        let value = self.value.get(key)?;
        value.as_u64().or_else(|| {
            value
                .as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        })
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ConductorError> {
        self.value
            .get(key)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| missing("boolean", key))
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.value.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    /// Get an array argument.
    pub fn get_array(&self, key: &str) -> Result<&Vec<Value>, ConductorError> {
        self.value
            .get(key)
            .and_then(|v| v.as_array())
            .ok_or_else(|| missing("array", key))
    }

    /// Deserialize the entire arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, ConductorError> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            ConductorError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

fn missing(kind: &str, key: &str) -> ConductorError {
    ConductorError::InvalidArgument(format!("Missing {kind} argument: {key}"))
}
