//! Declared output shapes and tool-use behaviors.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::{BatonError, Result};
use crate::tools::validation::validate_against_schema;

fn default_strict() -> bool {
    true
}

/// JSON shape the final output must have.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub schema: serde_json::Value,
    /// Ask the provider to enforce the schema while decoding.
    #[serde(default = "default_strict")]
    pub strict: bool,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            schema,
            strict: true,
        }
    }

    pub fn non_strict(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Parse and validate final output text.
    pub fn parse(&self, text: &str) -> Result<serde_json::Value> {
        let value: serde_json::Value = serde_json::from_str(text.trim()).map_err(|e| {
            BatonError::model_behavior(format!(
                "Invalid JSON when parsing output for {}: {e}",
                self.name
            ))
        })?;
        validate_against_schema(&value, &self.schema).map_err(|e| {
            BatonError::model_behavior(format!("Output does not match {}: {e}", self.name))
        })?;
        Ok(value)
    }
}

/// Result of one function tool call, as seen by a tool-use behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionToolResult {
    pub tool_name: String,
    pub call_id: String,
    pub output: serde_json::Value,
}

/// Decision of a custom tool-use behavior.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolsToFinalOutput {
    pub is_final_output: bool,
    pub final_output: Option<serde_json::Value>,
}

impl ToolsToFinalOutput {
    pub fn run_again() -> Self {
        Self::default()
    }

    pub fn finish(output: serde_json::Value) -> Self {
        Self {
            is_final_output: true,
            final_output: Some(output),
        }
    }
}

type ToolsToFinalOutputFn = dyn Fn(&RunContext, &[FunctionToolResult]) -> ToolsToFinalOutput + Send + Sync;

/// What happens after function tools ran in a turn.
#[derive(Clone, Default)]
pub enum ToolUseBehavior {
    /// Feed tool outputs back to the model.
    #[default]
    RunLlmAgain,
    /// The first tool's output is the final output.
    StopOnFirstTool,
    /// Stop when any of these tools ran; its output is the final output.
    StopAtTools(Vec<String>),
    Custom(Arc<ToolsToFinalOutputFn>),
}

impl ToolUseBehavior {
    pub fn custom<F>(decide: F) -> Self
    where
        F: Fn(&RunContext, &[FunctionToolResult]) -> ToolsToFinalOutput + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(decide))
    }

    pub fn decide(&self, ctx: &RunContext, results: &[FunctionToolResult]) -> ToolsToFinalOutput {
        if results.is_empty() {
            return ToolsToFinalOutput::run_again();
        }
        match self {
            Self::RunLlmAgain => ToolsToFinalOutput::run_again(),
            Self::StopOnFirstTool => ToolsToFinalOutput::finish(results[0].output.clone()),
            Self::StopAtTools(names) => results
                .iter()
                .find(|result| names.iter().any(|name| *name == result.tool_name))
                .map(|result| ToolsToFinalOutput::finish(result.output.clone()))
                .unwrap_or_default(),
            Self::Custom(decide) => decide(ctx, results),
        }
    }
}

impl fmt::Debug for ToolUseBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunLlmAgain => f.write_str("RunLlmAgain"),
            Self::StopOnFirstTool => f.write_str("StopOnFirstTool"),
            Self::StopAtTools(names) => f.debug_tuple("StopAtTools").field(names).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
