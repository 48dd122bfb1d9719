//! Core run types for the agent loop.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::items::{RunItem, ToolApprovalItem};
use super::state::RunState;
use crate::agent::Agent;
use crate::error::{BatonError, Result};
use crate::guardrail::{InputGuardrailResult, OutputGuardrailResult, ToolGuardrailResult};
use crate::types::items::{
    ApplyPatchCall, ComputerCall, McpCall, ModelResponse, ResponseItem, ShellCall,
};
use crate::types::message::{AgentToolCall, ModelMessage};
use crate::types::usage::Usage;

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Running,
    /// Waiting on approval decisions.
    Suspended,
    Completed,
    Failed,
}

/// What a run starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunInput {
    Text(String),
    Items(Vec<ResponseItem>),
}

impl RunInput {
    pub fn into_items(self) -> Vec<ResponseItem> {
        match self {
            Self::Text(text) => vec![ResponseItem::Message(ModelMessage::user(text))],
            Self::Items(items) => items,
        }
    }
}

impl From<&str> for RunInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for RunInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<ResponseItem>> for RunInput {
    fn from(items: Vec<ResponseItem>) -> Self {
        Self::Items(items)
    }
}

/// The partial run attached to an error that escaped the loop.
#[derive(Debug, Clone, Default)]
pub struct RunErrorDetails {
    pub input: Vec<ResponseItem>,
    pub new_items: Vec<RunItem>,
    pub raw_responses: Vec<ModelResponse>,
    pub last_agent: String,
    pub input_guardrail_results: Vec<InputGuardrailResult>,
    pub output_guardrail_results: Vec<OutputGuardrailResult>,
}

/// What the loop does after a turn.
#[derive(Debug, Clone)]
pub enum NextStep {
    RunAgain,
    Handoff(Arc<Agent>),
    FinalOutput(serde_json::Value),
    Interruption(Vec<ToolApprovalItem>),
}

/// Outcome of one turn.
#[derive(Debug, Clone)]
pub struct SingleStepResult {
    pub original_input: Vec<ResponseItem>,
    pub model_response: ModelResponse,
    /// Items generated before this turn.
    pub pre_step_items: Vec<RunItem>,
    /// Items generated during this turn.
    pub new_step_items: Vec<RunItem>,
    pub next_step: NextStep,
    pub tool_guardrail_results: Vec<ToolGuardrailResult>,
}

impl SingleStepResult {
    /// Every generated item, this turn's last.
    pub fn generated_items(&self) -> Vec<RunItem> {
        self.pre_step_items
            .iter()
            .chain(&self.new_step_items)
            .cloned()
            .collect()
    }
}

/// One model response, classified by the turn processor.
///
/// Calls are held by value; tools are resolved by name when they run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedResponse {
    pub new_items: Vec<RunItem>,
    pub handoffs: Vec<AgentToolCall>,
    pub functions: Vec<AgentToolCall>,
    pub computer_actions: Vec<ComputerCall>,
    pub shell_calls: Vec<ShellCall>,
    pub apply_patch_calls: Vec<ApplyPatchCall>,
    /// Hosted tool-server calls that arrived with their result attached.
    pub mcp_calls: Vec<McpCall>,
    pub tools_used: Vec<String>,
}

impl ProcessedResponse {
    pub fn has_tools_or_approvals_to_run(&self) -> bool {
        !self.handoffs.is_empty()
            || !self.functions.is_empty()
            || !self.computer_actions.is_empty()
            || !self.shell_calls.is_empty()
            || !self.apply_patch_calls.is_empty()
    }
}

/// Result of a run that finished or paused.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub input: Vec<ResponseItem>,
    pub new_items: Vec<RunItem>,
    pub raw_responses: Vec<ModelResponse>,
    pub final_output: Option<serde_json::Value>,
    pub last_agent: Arc<Agent>,
    /// Approvals the run is waiting on; empty unless suspended.
    pub interruptions: Vec<ToolApprovalItem>,
    pub input_guardrail_results: Vec<InputGuardrailResult>,
    pub output_guardrail_results: Vec<OutputGuardrailResult>,
    pub tool_guardrail_results: Vec<ToolGuardrailResult>,
    pub usage: Usage,
    pub status: RunStatus,
    pub(crate) state: RunState,
}

impl RunResult {
    /// The final output deserialized into `T`.
    ///
    /// Text output is parsed as JSON first, then tried as a plain string.
    pub fn final_output_as<T: DeserializeOwned>(&self) -> Result<T> {
        let output = self
            .final_output
            .clone()
            .ok_or_else(|| BatonError::InvalidState("Run has no final output".into()))?;
        if let serde_json::Value::String(text) = &output {
            if let Ok(parsed) = serde_json::from_str(text) {
                return Ok(parsed);
            }
        }
        Ok(serde_json::from_value(output)?)
    }

    /// Original input plus every generated item, ready to feed a new run.
    pub fn to_input_list(&self) -> Vec<ResponseItem> {
        self.input
            .iter()
            .cloned()
            .chain(self.new_items.iter().filter_map(RunItem::to_input_item))
            .collect()
    }

    pub fn last_response_id(&self) -> Option<&str> {
        self.raw_responses.last()?.response_id.as_deref()
    }

    /// Resumable state; approve or reject [`RunResult::interruptions`] on it.
    pub fn to_state(&self) -> RunState {
        self.state.clone()
    }

    pub fn is_suspended(&self) -> bool {
        self.status == RunStatus::Suspended
    }
}
