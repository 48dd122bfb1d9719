//! Resumable run state and its portable snapshot.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::items::{RunItem, ToolApprovalItem};
use super::types::{ProcessedResponse, RunStatus};
use crate::agent::Agent;
use crate::context::{ContextSnapshot, RunContext};
use crate::error::{BatonError, Result};
use crate::guardrail::{InputGuardrailResult, OutputGuardrailResult, ToolGuardrailResult};
use crate::types::items::{ModelResponse, ResponseItem};
use crate::types::usage::Usage;

pub const SCHEMA_VERSION: &str = "1.0";
const SCHEMA_VERSION_KEY: &str = "$schemaVersion";

/// Everything needed to continue a run, owned by that run.
///
/// Agents are not persisted: [`RunState::from_json`] takes the starting
/// agent again and re-resolves the current agent by name.
#[derive(Debug, Clone)]
pub struct RunState {
    pub(crate) context: RunContext,
    /// Model input before the current turn, after any handoff filtering.
    pub(crate) original_input: Vec<ResponseItem>,
    pub(crate) starting_agent: Arc<Agent>,
    pub(crate) current_agent: Arc<Agent>,
    pub(crate) current_turn: usize,
    pub(crate) max_turns: usize,
    pub(crate) model_responses: Vec<ModelResponse>,
    pub(crate) generated_items: Vec<RunItem>,
    pub(crate) interruptions: Vec<ToolApprovalItem>,
    pub(crate) last_processed_response: Option<ProcessedResponse>,
    pub(crate) input_guardrail_results: Vec<InputGuardrailResult>,
    pub(crate) output_guardrail_results: Vec<OutputGuardrailResult>,
    pub(crate) tool_guardrail_results: Vec<ToolGuardrailResult>,
    /// Generated items already written to the session.
    pub(crate) persisted_item_count: usize,
    pub(crate) previous_response_id: Option<String>,
    pub(crate) status: RunStatus,
}

#[derive(Debug, Serialize, Deserialize)]
struct RunStateSnapshot {
    #[serde(rename = "$schemaVersion")]
    schema_version: String,
    #[serde(default)]
    context: ContextSnapshot,
    original_input: Vec<ResponseItem>,
    starting_agent: String,
    current_agent: String,
    current_turn: usize,
    max_turns: usize,
    #[serde(default)]
    model_responses: Vec<ModelResponse>,
    #[serde(default)]
    generated_items: Vec<RunItem>,
    #[serde(default)]
    interruptions: Vec<ToolApprovalItem>,
    #[serde(default)]
    last_processed_response: Option<ProcessedResponse>,
    #[serde(default)]
    input_guardrail_results: Vec<InputGuardrailResult>,
    #[serde(default)]
    output_guardrail_results: Vec<OutputGuardrailResult>,
    #[serde(default)]
    tool_guardrail_results: Vec<ToolGuardrailResult>,
    #[serde(default)]
    persisted_item_count: usize,
    #[serde(default)]
    previous_response_id: Option<String>,
    #[serde(default)]
    status: RunStatus,
}

impl RunState {
    pub(crate) fn new(
        context: RunContext,
        original_input: Vec<ResponseItem>,
        starting_agent: Arc<Agent>,
        max_turns: usize,
    ) -> Self {
        Self {
            context,
            original_input,
            current_agent: starting_agent.clone(),
            starting_agent,
            current_turn: 0,
            max_turns,
            model_responses: Vec::new(),
            generated_items: Vec::new(),
            interruptions: Vec::new(),
            last_processed_response: None,
            input_guardrail_results: Vec::new(),
            output_guardrail_results: Vec::new(),
            tool_guardrail_results: Vec::new(),
            persisted_item_count: 0,
            previous_response_id: None,
            status: RunStatus::Running,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Re-attach the caller value a snapshot cannot carry.
    pub fn with_context_value<T: std::any::Any + Send + Sync>(mut self, value: T) -> Self {
        self.context = self.context.with_value(value);
        self
    }

    /// Run this state against `context` instead of its own.
    pub(crate) fn with_context(mut self, context: RunContext) -> Self {
        self.context = context;
        self
    }

    pub fn original_input(&self) -> &[ResponseItem] {
        &self.original_input
    }

    pub fn starting_agent(&self) -> &Arc<Agent> {
        &self.starting_agent
    }

    pub fn current_agent(&self) -> &Arc<Agent> {
        &self.current_agent
    }

    pub fn current_turn(&self) -> usize {
        self.current_turn
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn generated_items(&self) -> &[RunItem] {
        &self.generated_items
    }

    pub fn model_responses(&self) -> &[ModelResponse] {
        &self.model_responses
    }

    pub fn interruptions(&self) -> &[ToolApprovalItem] {
        &self.interruptions
    }

    /// Interruptions that still have no decision.
    pub fn pending_approvals(&self) -> Vec<&ToolApprovalItem> {
        self.interruptions
            .iter()
            .filter(|item| {
                self.context
                    .approval_status(&item.tool_name, &item.call_id)
                    .is_none()
            })
            .collect()
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn usage(&self) -> Usage {
        self.context.usage().total_usage()
    }

    pub fn previous_response_id(&self) -> Option<&str> {
        self.previous_response_id.as_deref()
    }

    /// Approve `item`; with `always`, every later call of the same tool too.
    pub fn approve(&self, item: &ToolApprovalItem, always: bool) {
        self.context.approve_tool(&item.tool_name, &item.call_id, always);
    }

    /// Approve `item` and use `output` instead of running the tool.
    pub fn approve_with_output(&self, item: &ToolApprovalItem, output: serde_json::Value) {
        self.context
            .approve_tool_with_output(&item.tool_name, &item.call_id, output);
    }

    pub fn reject(&self, item: &ToolApprovalItem, always: bool) {
        self.context
            .reject_tool(&item.tool_name, &item.call_id, always, None);
    }

    /// Reject `item`; the model sees `message` as the tool output.
    pub fn reject_with_message(&self, item: &ToolApprovalItem, message: impl Into<String>) {
        self.context
            .reject_tool(&item.tool_name, &item.call_id, false, Some(message.into()));
    }

    /// Portable snapshot, tagged with [`SCHEMA_VERSION`].
    pub fn to_json(&self) -> Result<serde_json::Value> {
        self.snapshot(self.context.snapshot())
    }

    /// Snapshot without the context, for a run whose context lives elsewhere.
    pub(crate) fn to_detached_json(&self) -> Result<serde_json::Value> {
        self.snapshot(ContextSnapshot::default())
    }

    fn snapshot(&self, context: ContextSnapshot) -> Result<serde_json::Value> {
        let snapshot = RunStateSnapshot {
            schema_version: SCHEMA_VERSION.to_string(),
            context,
            original_input: self.original_input.clone(),
            starting_agent: self.starting_agent.name().to_string(),
            current_agent: self.current_agent.name().to_string(),
            current_turn: self.current_turn,
            max_turns: self.max_turns,
            model_responses: self.model_responses.clone(),
            generated_items: self.generated_items.clone(),
            interruptions: self.interruptions.clone(),
            last_processed_response: self.last_processed_response.clone(),
            input_guardrail_results: self.input_guardrail_results.clone(),
            output_guardrail_results: self.output_guardrail_results.clone(),
            tool_guardrail_results: self.tool_guardrail_results.clone(),
            persisted_item_count: self.persisted_item_count,
            previous_response_id: self.previous_response_id.clone(),
            status: self.status,
        };
        Ok(serde_json::to_value(snapshot)?)
    }

    #[allow(clippy::inherent_to_string)]
    pub fn to_string(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_json()?)?)
    }

    /// Rebuild a state from [`RunState::to_json`] output.
    ///
    /// `starting_agent` must be the agent the run started with; the current
    /// agent is looked up in its handoff graph.
    pub fn from_json(starting_agent: Arc<Agent>, value: serde_json::Value) -> Result<Self> {
        match value.get(SCHEMA_VERSION_KEY).and_then(|v| v.as_str()) {
            None => return Err(BatonError::user("Run state is missing schema version")),
            Some(SCHEMA_VERSION) => {}
            Some(other) => {
                return Err(BatonError::user(format!(
                    "Run state schema version {other} is not supported. Please use version {SCHEMA_VERSION}"
                )))
            }
        }

        let snapshot: RunStateSnapshot = serde_json::from_value(value)?;
        if snapshot.starting_agent != starting_agent.name() {
            tracing::warn!(
                expected = %snapshot.starting_agent,
                supplied = %starting_agent.name(),
                "Run state was created with a different starting agent"
            );
        }
        let current_agent = starting_agent
            .find_agent(&snapshot.current_agent)
            .ok_or_else(|| {
                BatonError::user(format!(
                    "Agent {} not found in the handoffs of {}",
                    snapshot.current_agent,
                    starting_agent.name()
                ))
            })?;

        Ok(Self {
            context: RunContext::from_snapshot(snapshot.context),
            original_input: snapshot.original_input,
            starting_agent,
            current_agent,
            current_turn: snapshot.current_turn,
            max_turns: snapshot.max_turns,
            model_responses: snapshot.model_responses,
            generated_items: snapshot.generated_items,
            interruptions: snapshot.interruptions,
            last_processed_response: snapshot.last_processed_response,
            input_guardrail_results: snapshot.input_guardrail_results,
            output_guardrail_results: snapshot.output_guardrail_results,
            tool_guardrail_results: snapshot.tool_guardrail_results,
            persisted_item_count: snapshot.persisted_item_count,
            previous_response_id: snapshot.previous_response_id,
            status: snapshot.status,
        })
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(starting_agent: Arc<Agent>, text: &str) -> Result<Self> {
        Self::from_json(starting_agent, serde_json::from_str(text)?)
    }

    /// Every generated item, in order, as model input.
    pub(crate) fn input_with_generated(&self) -> Vec<ResponseItem> {
        self.original_input
            .iter()
            .cloned()
            .chain(self.generated_items.iter().filter_map(RunItem::to_input_item))
            .collect()
    }
}
