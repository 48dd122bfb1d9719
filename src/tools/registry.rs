//! Tool declarations and the tool-kind registry consulted by provider adapters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Provider-agnostic declaration of one tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    /// Tool kind: `function`, `computer`, `shell`, `apply_patch`, or a hosted kind.
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Kind-specific settings (display size, server url, ...).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

impl ToolSpec {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self::of_kind("function", name, description, parameters)
    }

    pub fn of_kind(
        kind: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            description: description.into(),
            parameters,
            config: serde_json::Value::Null,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Generic function-tool wire shape.
    pub fn to_function_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }
}

type ToolConverter = dyn Fn(&ToolSpec) -> serde_json::Value + Send + Sync;

/// Converters for vendor-specific tool kinds.
///
/// Provider adapters call [`ToolKindRegistry::convert`]; kinds without a
/// registered converter fall back to the generic function shape.
#[derive(Clone, Default)]
pub struct ToolKindRegistry {
    converters: HashMap<String, Arc<ToolConverter>>,
}

impl fmt::Debug for ToolKindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.converters.keys().collect();
        kinds.sort();
        f.debug_struct("ToolKindRegistry").field("kinds", &kinds).finish()
    }
}

impl ToolKindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the converter for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, converter: F) -> &mut Self
    where
        F: Fn(&ToolSpec) -> serde_json::Value + Send + Sync + 'static,
    {
        self.converters.insert(kind.into(), Arc::new(converter));
        self
    }

    pub fn with<F>(mut self, kind: impl Into<String>, converter: F) -> Self
    where
        F: Fn(&ToolSpec) -> serde_json::Value + Send + Sync + 'static,
    {
        self.register(kind, converter);
        self
    }

    pub fn handles(&self, kind: &str) -> bool {
        self.converters.contains_key(kind)
    }

    pub fn convert(&self, spec: &ToolSpec) -> serde_json::Value {
        match self.converters.get(&spec.kind) {
            Some(converter) => converter(spec),
            None => spec.to_function_json(),
        }
    }

    pub fn convert_all(&self, specs: &[ToolSpec]) -> Vec<serde_json::Value> {
        specs.iter().map(|spec| self.convert(spec)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registered_kind_uses_its_converter() {
        let registry = ToolKindRegistry::new().with("web_search", |spec| {
            json!({"type": "web_search_preview", "search_context_size": spec.config["size"]})
        });
        let spec = ToolSpec::of_kind("web_search", "web_search", "", json!(null))
            .with_config(json!({"size": "low"}));

        assert!(registry.handles("web_search"));
        assert_eq!(
            registry.convert(&spec),
            json!({"type": "web_search_preview", "search_context_size": "low"})
        );
    }

    #[test]
    fn unknown_kind_falls_back_to_function_shape() {
        let registry = ToolKindRegistry::new();
        let spec = ToolSpec::function("lookup", "Look things up", json!({"type": "object"}));

        let converted = registry.convert_all(&[spec]);

        assert_eq!(converted[0]["type"], "function");
        assert_eq!(converted[0]["name"], "lookup");
    }
}
