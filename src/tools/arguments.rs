//! Typed access to tool call arguments.

use crate::error::BatonError;

/// Parsed tool call arguments.
///
/// Models sometimes send arguments as a JSON string instead of an object;
/// [`ToolArguments::parse`] normalizes both shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    value: serde_json::Value,
}

impl ToolArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Normalize raw model arguments: JSON text is parsed, empty text becomes `{}`.
    pub fn parse(raw: &serde_json::Value) -> Result<Self, BatonError> {
        let value = match raw {
            serde_json::Value::String(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(trimmed).map_err(|e| {
                        BatonError::InvalidArgument(format!("Arguments are not valid JSON: {e}"))
                    })?
                }
            }
            serde_json::Value::Null => serde_json::json!({}),
            other => other.clone(),
        };
        Ok(Self { value })
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn into_value(self) -> serde_json::Value {
        self.value
    }

    fn missing(kind: &str, key: &str) -> BatonError {
        BatonError::InvalidArgument(format!("Missing {kind} argument: {key}"))
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str, BatonError> {
        self.get_str_opt(key).ok_or_else(|| Self::missing("string", key))
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(|v| v.as_str())
    }

    /// Get an integer argument.
    pub fn get_i64(&self, key: &str) -> Result<i64, BatonError> {
        self.value
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| Self::missing("integer", key))
    }

    /// Get a float argument.
    pub fn get_f64(&self, key: &str) -> Result<f64, BatonError> {
        self.value
            .get(key)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| Self::missing("float", key))
    }

    /// Get a boolean argument.
    pub fn get_bool(&self, key: &str) -> Result<bool, BatonError> {
        self.value
            .get(key)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| Self::missing("boolean", key))
    }

    /// Deserialize the entire arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, BatonError> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            BatonError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_accepts_objects_and_json_text() {
        let from_obj = ToolArguments::parse(&json!({"city": "Oakland"}))
            .expect("object arguments should parse");
        let from_text = ToolArguments::parse(&json!(r#"{"city": "Oakland"}"#))
            .expect("stringified arguments should parse");

        assert_eq!(from_obj, from_text);
        assert_eq!(from_text.get_str("city").expect("city should be present"), "Oakland");
    }

    #[test]
    fn parse_treats_empty_text_as_empty_object() {
        let args = ToolArguments::parse(&json!("  ")).expect("empty text should parse");
        assert_eq!(args.raw(), &json!({}));
    }

    #[test]
    fn parse_rejects_malformed_text() {
        let err = ToolArguments::parse(&json!("{oops")).expect_err("bad JSON should fail");
        assert!(matches!(err, BatonError::InvalidArgument(msg) if msg.contains("valid JSON")));
    }

    #[test]
    fn deserialize_into_struct() {
        #[derive(serde::Deserialize)]
        struct Query {
            city: String,
            days: u32,
        }

        let args = ToolArguments::new(json!({"city": "Paris", "days": 3}));
        let query: Query = args.deserialize().expect("arguments should deserialize");
        assert_eq!(query.city, "Paris");
        assert_eq!(query.days, 3);
    }
}
