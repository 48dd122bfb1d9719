//! Handoffs: delegating the conversation to another agent.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, LazyLock};

use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::Agent;
use crate::agent_loop::items::RunItem;
use crate::context::RunContext;
use crate::error::Result;
use crate::tools::registry::ToolSpec;
use crate::types::items::ResponseItem;

/// What the next agent will see.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandoffInputData {
    /// Input of the run before the current turn.
    pub input_history: Vec<ResponseItem>,
    /// Items generated before the turn that triggered the handoff.
    pub pre_handoff_items: Vec<RunItem>,
    /// Items generated during that turn, including the handoff call and output.
    pub new_items: Vec<RunItem>,
}

impl HandoffInputData {
    /// Everything as model input, in order.
    pub fn to_input(&self) -> Vec<ResponseItem> {
        self.input_history
            .iter()
            .cloned()
            .chain(
                self.pre_handoff_items
                    .iter()
                    .chain(&self.new_items)
                    .filter_map(RunItem::to_input_item),
            )
            .collect()
    }
}

pub type HandoffInputFilter = Arc<dyn Fn(HandoffInputData) -> HandoffInputData + Send + Sync>;

type ResolverFn =
    dyn Fn(RunContext, serde_json::Value) -> BoxFuture<'static, Result<Arc<Agent>>> + Send + Sync;

type EnabledFn = dyn Fn(&RunContext) -> bool + Send + Sync;

#[derive(Clone)]
enum HandoffTarget {
    Agent(Arc<Agent>),
    Resolver(Arc<ResolverFn>),
}

/// A tool the model can call to transfer control to another agent.
#[derive(Clone)]
pub struct Handoff {
    tool_name: String,
    tool_description: String,
    agent_name: String,
    input_schema: serde_json::Value,
    target: HandoffTarget,
    input_filter: Option<HandoffInputFilter>,
    is_enabled: Option<Arc<EnabledFn>>,
}

impl Handoff {
    /// Hand off to a fixed agent.
    pub fn to(agent: Arc<Agent>) -> Self {
        Self {
            tool_name: default_tool_name(agent.name()),
            tool_description: default_tool_description(&agent),
            agent_name: agent.name().to_string(),
            input_schema: empty_object_schema(),
            target: HandoffTarget::Agent(agent),
            input_filter: None,
            is_enabled: None,
        }
    }

    /// Hand off to an agent produced when the call happens.
    ///
    /// The resolver receives the call arguments.
    pub fn resolver<F, Fut>(agent_name: impl Into<String>, resolve: F) -> Self
    where
        F: Fn(RunContext, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<Agent>>> + Send + 'static,
    {
        let agent_name = agent_name.into();
        Self {
            tool_name: default_tool_name(&agent_name),
            tool_description: format!("Handoff to the {agent_name} agent to handle the request. "),
            agent_name,
            input_schema: empty_object_schema(),
            target: HandoffTarget::Resolver(Arc::new(move |ctx, args| Box::pin(resolve(ctx, args)))),
            input_filter: None,
            is_enabled: None,
        }
    }

    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = name.into();
        self
    }

    pub fn with_tool_description(mut self, description: impl Into<String>) -> Self {
        self.tool_description = description.into();
        self
    }

    /// JSON Schema for arguments the model must supply with the call.
    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_input_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(HandoffInputData) -> HandoffInputData + Send + Sync + 'static,
    {
        self.input_filter = Some(Arc::new(filter));
        self
    }

    pub fn with_is_enabled<F>(mut self, enabled: F) -> Self
    where
        F: Fn(&RunContext) -> bool + Send + Sync + 'static,
    {
        self.is_enabled = Some(Arc::new(enabled));
        self
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn tool_description(&self) -> &str {
        &self.tool_description
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn input_filter(&self) -> Option<&HandoffInputFilter> {
        self.input_filter.as_ref()
    }

    pub fn is_enabled(&self, ctx: &RunContext) -> bool {
        self.is_enabled.as_ref().map_or(true, |enabled| enabled(ctx))
    }

    /// The target agent when it is known without running the handoff.
    pub fn static_target(&self) -> Option<&Arc<Agent>> {
        match &self.target {
            HandoffTarget::Agent(agent) => Some(agent),
            HandoffTarget::Resolver(_) => None,
        }
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec::function(
            self.tool_name.clone(),
            self.tool_description.clone(),
            self.input_schema.clone(),
        )
    }

    pub async fn resolve(&self, ctx: &RunContext, arguments: serde_json::Value) -> Result<Arc<Agent>> {
        match &self.target {
            HandoffTarget::Agent(agent) => Ok(agent.clone()),
            HandoffTarget::Resolver(resolve) => resolve(ctx.clone(), arguments).await,
        }
    }

    /// The output fed back to the model for a successful transfer.
    pub fn transfer_output(agent_name: &str) -> serde_json::Value {
        serde_json::json!({ "assistant": agent_name })
    }
}

impl From<Arc<Agent>> for Handoff {
    fn from(agent: Arc<Agent>) -> Self {
        Self::to(agent)
    }
}

impl From<Agent> for Handoff {
    fn from(agent: Agent) -> Self {
        Self::to(Arc::new(agent))
    }
}

impl fmt::Debug for Handoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff")
            .field("tool_name", &self.tool_name)
            .field("agent_name", &self.agent_name)
            .field("has_input_filter", &self.input_filter.is_some())
            .finish()
    }
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": [],
        "additionalProperties": false,
    })
}

static INVALID_TOOL_NAME_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-zA-Z0-9_]").expect("tool name normalization regex must compile")
});

/// `transfer_to_<name>` in function-call-safe snake case.
pub fn default_tool_name(agent_name: &str) -> String {
    let raw = format!("transfer_to_{}", agent_name.replace(' ', "_"));
    INVALID_TOOL_NAME_CHARS.replace_all(&raw, "_").to_lowercase()
}

pub fn default_tool_description(agent: &Agent) -> String {
    format!(
        "Handoff to the {} agent to handle the request. {}",
        agent.name(),
        agent.handoff_description().unwrap_or_default()
    )
}

/// Ready-made input filters.
pub mod filters {
    use super::*;

    fn is_tool_item(item: &RunItem) -> bool {
        matches!(
            item,
            RunItem::ToolCall { .. }
                | RunItem::ToolCallOutput { .. }
                | RunItem::HandoffCall { .. }
                | RunItem::HandoffOutput { .. }
                | RunItem::ToolApproval(_)
        )
    }

    fn is_tool_input(item: &ResponseItem) -> bool {
        !matches!(
            item,
            ResponseItem::Message(_) | ResponseItem::Reasoning(_) | ResponseItem::Compaction(_)
        )
    }

    /// Drop every tool call and tool output.
    pub fn remove_all_tools() -> HandoffInputFilter {
        Arc::new(|data: HandoffInputData| HandoffInputData {
            input_history: data
                .input_history
                .into_iter()
                .filter(|item| !is_tool_input(item))
                .collect(),
            pre_handoff_items: data
                .pre_handoff_items
                .into_iter()
                .filter(|item| !is_tool_item(item))
                .collect(),
            new_items: data
                .new_items
                .into_iter()
                .filter(|item| !is_tool_item(item))
                .collect(),
        })
    }

    /// Keep only the last `n` history entries, counting across all three parts.
    pub fn keep_last(n: usize) -> HandoffInputFilter {
        Arc::new(move |data: HandoffInputData| {
            let mut budget = n;
            let mut take_tail = |len: usize| {
                let keep = len.min(budget);
                budget -= keep;
                len - keep
            };

            let skip_new = take_tail(data.new_items.len());
            let skip_pre = take_tail(data.pre_handoff_items.len());
            let skip_history = take_tail(data.input_history.len());

            HandoffInputData {
                input_history: data.input_history.into_iter().skip(skip_history).collect(),
                pre_handoff_items: data.pre_handoff_items.into_iter().skip(skip_pre).collect(),
                new_items: data.new_items.into_iter().skip(skip_new).collect(),
            }
        })
    }
}
