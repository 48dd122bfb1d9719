//! Model settings and related enums.

use bon::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};

/// Settings forwarded to the model provider with every call.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelSettings {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    pub tool_choice: Option<ToolChoice>,
    pub parallel_tool_calls: Option<bool>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub truncation: Option<Truncation>,
    pub store: Option<bool>,
    pub metadata: Option<HashMap<String, String>>,
}

impl ModelSettings {
    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn resolve(&self, other: Option<&ModelSettings>) -> ModelSettings {
        let Some(other) = other else {
            return self.clone();
        };
        ModelSettings {
            temperature: other.temperature.or(self.temperature),
            top_p: other.top_p.or(self.top_p),
            max_tokens: other.max_tokens.or(self.max_tokens),
            tool_choice: other.tool_choice.clone().or_else(|| self.tool_choice.clone()),
            parallel_tool_calls: other.parallel_tool_calls.or(self.parallel_tool_calls),
            reasoning_effort: other.reasoning_effort.or(self.reasoning_effort),
            truncation: other.truncation.or(self.truncation),
            store: other.store.or(self.store),
            metadata: other.metadata.clone().or_else(|| self.metadata.clone()),
        }
    }
}

/// Which tool the model may or must call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Required,
    None,
    Function { name: String },
}

/// Reasoning effort level for reasoning models.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Low,
    Medium,
    High,
}

/// Context truncation strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Truncation {
    Auto,
    Disabled,
}

/// How the provider should trace a call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelTracing {
    Disabled,
    #[default]
    Enabled,
    /// Trace calls but omit inputs and outputs.
    EnabledWithoutData,
}

impl ModelTracing {
    pub fn from_flags(disabled: bool, include_sensitive_data: bool) -> Self {
        match (disabled, include_sensitive_data) {
            (true, _) => Self::Disabled,
            (false, true) => Self::Enabled,
            (false, false) => Self::EnabledWithoutData,
        }
    }
}
