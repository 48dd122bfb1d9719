//! Agents: immutable templates describing what a run may do.

pub mod as_tool;
pub mod handoff;
pub mod output;

pub use as_tool::AgentAsTool;
pub use handoff::{Handoff, HandoffInputData, HandoffInputFilter};
pub use output::{FunctionToolResult, OutputSchema, ToolUseBehavior, ToolsToFinalOutput};

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::agent_loop::runner::Runner;
use crate::context::RunContext;
use crate::error::{BatonError, Result};
use crate::guardrail::{InputGuardrail, OutputGuardrail};
use crate::mcp::{McpNamingPolicy, McpServer, McpToolAggregator};
use crate::tools::apply_patch::ApplyPatchTool;
use crate::tools::computer::ComputerTool;
use crate::tools::registry::ToolSpec;
use crate::tools::shell::ShellTool;
use crate::tools::tool::Tool;
use crate::types::settings::ModelSettings;

type InstructionsFn =
    dyn Fn(RunContext, Arc<Agent>) -> BoxFuture<'static, Result<String>> + Send + Sync;

/// Where an agent's system prompt comes from.
#[derive(Clone)]
pub enum Instructions {
    Static(String),
    /// Resolved at the start of every turn.
    Dynamic(Arc<InstructionsFn>),
}

impl fmt::Debug for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(text) => f.debug_tuple("Static").field(text).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// An agent definition.
///
/// Agents are never mutated by a run. Variants are built with the consuming
/// `with_*` methods on a clone.
#[derive(Clone)]
pub struct Agent {
    name: String,
    instructions: Option<Instructions>,
    handoff_description: Option<String>,
    model: Option<String>,
    model_settings: ModelSettings,
    tools: Vec<Arc<dyn Tool>>,
    hosted_tools: Vec<ToolSpec>,
    computer: Option<ComputerTool>,
    shell: Option<ShellTool>,
    apply_patch: Option<ApplyPatchTool>,
    mcp_servers: Vec<Arc<McpServer>>,
    mcp_naming: McpNamingPolicy,
    handoffs: Vec<Handoff>,
    input_guardrails: Vec<InputGuardrail>,
    output_guardrails: Vec<OutputGuardrail>,
    output_schema: Option<OutputSchema>,
    tool_use_behavior: ToolUseBehavior,
    reset_tool_choice: bool,
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: None,
            handoff_description: None,
            model: None,
            model_settings: ModelSettings::default(),
            tools: Vec::new(),
            hosted_tools: Vec::new(),
            computer: None,
            shell: None,
            apply_patch: None,
            mcp_servers: Vec::new(),
            mcp_naming: McpNamingPolicy::default(),
            handoffs: Vec::new(),
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            output_schema: None,
            tool_use_behavior: ToolUseBehavior::default(),
            reset_tool_choice: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(Instructions::Static(instructions.into()));
        self
    }

    pub fn with_dynamic_instructions<F, Fut>(mut self, resolve: F) -> Self
    where
        F: Fn(RunContext, Arc<Agent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        self.instructions = Some(Instructions::Dynamic(Arc::new(move |ctx, agent| {
            Box::pin(resolve(ctx, agent))
        })));
        self
    }

    /// Shown to other agents deciding whether to hand off to this one.
    pub fn with_handoff_description(mut self, description: impl Into<String>) -> Self {
        self.handoff_description = Some(description.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = settings;
        self
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// A provider-executed tool, declared to the model but never run locally.
    pub fn with_hosted_tool(mut self, spec: ToolSpec) -> Self {
        self.hosted_tools.push(spec);
        self
    }

    pub fn with_computer(mut self, computer: ComputerTool) -> Self {
        self.computer = Some(computer);
        self
    }

    pub fn with_shell(mut self, shell: ShellTool) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn with_apply_patch(mut self, apply_patch: ApplyPatchTool) -> Self {
        self.apply_patch = Some(apply_patch);
        self
    }

    pub fn with_mcp_server(mut self, server: Arc<McpServer>) -> Self {
        self.mcp_servers.push(server);
        self
    }

    pub fn with_mcp_naming(mut self, policy: McpNamingPolicy) -> Self {
        self.mcp_naming = policy;
        self
    }

    pub fn with_handoff(mut self, handoff: impl Into<Handoff>) -> Self {
        self.handoffs.push(handoff.into());
        self
    }

    pub fn with_input_guardrail(mut self, guardrail: InputGuardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: OutputGuardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    pub fn with_output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_tool_use_behavior(mut self, behavior: ToolUseBehavior) -> Self {
        self.tool_use_behavior = behavior;
        self
    }

    /// Whether a forced `tool_choice` is cleared after the agent used a tool.
    pub fn with_reset_tool_choice(mut self, reset: bool) -> Self {
        self.reset_tool_choice = reset;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handoff_description(&self) -> Option<&str> {
        self.handoff_description.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn model_settings(&self) -> &ModelSettings {
        &self.model_settings
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn hosted_tools(&self) -> &[ToolSpec] {
        &self.hosted_tools
    }

    pub fn computer(&self) -> Option<&ComputerTool> {
        self.computer.as_ref()
    }

    pub fn shell(&self) -> Option<&ShellTool> {
        self.shell.as_ref()
    }

    pub fn apply_patch(&self) -> Option<&ApplyPatchTool> {
        self.apply_patch.as_ref()
    }

    pub fn mcp_servers(&self) -> &[Arc<McpServer>] {
        &self.mcp_servers
    }

    pub fn handoffs(&self) -> &[Handoff] {
        &self.handoffs
    }

    pub fn input_guardrails(&self) -> &[InputGuardrail] {
        &self.input_guardrails
    }

    pub fn output_guardrails(&self) -> &[OutputGuardrail] {
        &self.output_guardrails
    }

    pub fn output_schema(&self) -> Option<&OutputSchema> {
        self.output_schema.as_ref()
    }

    pub fn tool_use_behavior(&self) -> &ToolUseBehavior {
        &self.tool_use_behavior
    }

    pub fn reset_tool_choice(&self) -> bool {
        self.reset_tool_choice
    }

    /// Resolve the system prompt for this turn.
    pub async fn system_prompt(self: &Arc<Self>, ctx: &RunContext) -> Result<Option<String>> {
        match &self.instructions {
            None => Ok(None),
            Some(Instructions::Static(text)) => Ok(Some(text.clone())),
            Some(Instructions::Dynamic(resolve)) => {
                resolve(ctx.clone(), self.clone()).await.map(Some)
            }
        }
    }

    /// Function tools visible this turn: enabled local tools, then server tools.
    ///
    /// Two tools with the same name are a configuration mistake.
    pub async fn all_tools(&self, ctx: &RunContext) -> Result<Vec<Arc<dyn Tool>>> {
        let mut tools: Vec<Arc<dyn Tool>> = self
            .tools
            .iter()
            .filter(|tool| tool.is_enabled(ctx))
            .cloned()
            .collect();

        if !self.mcp_servers.is_empty() {
            let aggregated = McpToolAggregator::new(self.mcp_servers.clone())?
                .with_naming_policy(self.mcp_naming)
                .list_tools()
                .await?;
            tools.extend(aggregated.into_iter().map(|tool| Arc::new(tool) as Arc<dyn Tool>));
        }

        let mut seen = HashSet::with_capacity(tools.len());
        for tool in &tools {
            if !seen.insert(tool.name()) {
                return Err(BatonError::user(format!(
                    "Duplicate tool name '{}' in agent {}",
                    tool.name(),
                    self.name
                )));
            }
        }
        Ok(tools)
    }

    /// Declarations of the capability and hosted tools.
    pub fn builtin_tool_specs(&self) -> Vec<ToolSpec> {
        let mut specs = Vec::new();
        if let Some(computer) = &self.computer {
            specs.push(computer.spec());
        }
        if let Some(shell) = &self.shell {
            specs.push(shell.spec());
        }
        if let Some(apply_patch) = &self.apply_patch {
            specs.push(apply_patch.spec());
        }
        specs.extend(self.hosted_tools.iter().cloned());
        specs
    }

    pub fn enabled_handoffs(&self, ctx: &RunContext) -> Vec<Handoff> {
        self.handoffs
            .iter()
            .filter(|handoff| handoff.is_enabled(ctx))
            .cloned()
            .collect()
    }

    /// Find `name` in the graph of agents reachable through static handoffs.
    pub fn find_agent(self: &Arc<Self>, name: &str) -> Option<Arc<Agent>> {
        let mut queue = VecDeque::from([self.clone()]);
        let mut visited = HashSet::new();
        while let Some(agent) = queue.pop_front() {
            if agent.name == name {
                return Some(agent);
            }
            if !visited.insert(agent.name.clone()) {
                continue;
            }
            queue.extend(
                agent
                    .handoffs
                    .iter()
                    .filter_map(|handoff| handoff.static_target().cloned()),
            );
        }
        None
    }

    /// Expose this agent as a function tool that runs it to completion.
    pub fn as_tool(
        self: &Arc<Self>,
        runner: Runner,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> AgentAsTool {
        AgentAsTool::new(self.clone(), runner, name, description)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field(
                "tools",
                &self.tools.iter().map(|tool| tool.name()).collect::<Vec<_>>(),
            )
            .field(
                "handoffs",
                &self
                    .handoffs
                    .iter()
                    .map(Handoff::agent_name)
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
