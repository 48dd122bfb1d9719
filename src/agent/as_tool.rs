//! Running an agent as a tool of another agent.

use std::sync::Arc;

use async_trait::async_trait;

use super::Agent;
use crate::agent_loop::runner::{RunOptions, Runner};
use crate::agent_loop::side_table::{CallSignature, NestedRunOutcome};
use crate::agent_loop::state::RunState;
use crate::error::Result;
use crate::tools::arguments::ToolArguments;
use crate::tools::tool::{Tool, ToolExecutionContext};
use crate::tools::types::{AgentToolParameters, ApprovalRequirement};

/// A function tool whose handler is a nested run of another agent.
///
/// The nested run shares the caller's context, so usage and approvals
/// accumulate in one place. Its outcome is recorded in the context's
/// nested-run side table under the call signature. A nested run that pauses
/// for approval is parked there too and resumed, not restarted, when the
/// outer run retries the call.
pub struct AgentAsTool {
    agent: Arc<Agent>,
    runner: Runner,
    name: String,
    description: String,
    parameters: AgentToolParameters,
    approval: ApprovalRequirement,
}

impl AgentAsTool {
    pub fn new(
        agent: Arc<Agent>,
        runner: Runner,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            runner,
            name: name.into(),
            description: description.into(),
            parameters: AgentToolParameters::object()
                .string("input", "The request for the agent", true)
                .build(),
            approval: ApprovalRequirement::Never,
        }
    }

    pub fn with_needs_approval(mut self, approval: ApprovalRequirement) -> Self {
        self.approval = approval;
        self
    }

    fn nested_input(args: &ToolArguments) -> String {
        match args.get_str_opt("input") {
            Some(input) => input.to_string(),
            None => args.raw().to_string(),
        }
    }
}

#[async_trait]
impl Tool for AgentAsTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &AgentToolParameters {
        &self.parameters
    }

    fn needs_approval(&self) -> ApprovalRequirement {
        self.approval.clone()
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value> {
        let nested = ctx.run_context.nested_results();
        let signature = ctx
            .tool_call_id
            .as_ref()
            .map(|call_id| CallSignature::new(&self.name, args.raw(), call_id.as_str()));
        let options = RunOptions::default().with_context(ctx.run_context.clone());

        let result = match signature.as_ref().and_then(|s| nested.take_parked(s)) {
            Some(snapshot) => {
                tracing::debug!(tool = %self.name, "Resuming parked nested run");
                let state = RunState::from_json(self.agent.clone(), snapshot)?
                    .with_context(ctx.run_context.clone());
                self.runner.resume(state, options).await?
            }
            None => {
                self.runner
                    .run_with(self.agent.clone(), Self::nested_input(args), options)
                    .await?
            }
        };

        if let Some(signature) = signature {
            if !result.interruptions.is_empty() {
                nested.park(&signature, result.state.to_detached_json()?);
            }
            nested.record(
                signature,
                NestedRunOutcome {
                    agent_name: result.last_agent.name().to_string(),
                    final_output: result.final_output.clone(),
                    interruptions: result.interruptions.clone(),
                },
            );
        }

        if !result.interruptions.is_empty() {
            tracing::debug!(
                tool = %self.name,
                pending = result.interruptions.len(),
                "Nested run is waiting on approvals"
            );
            return Ok(serde_json::Value::Null);
        }
        Ok(result.final_output.unwrap_or(serde_json::Value::Null))
    }
}

impl std::fmt::Debug for AgentAsTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentAsTool")
            .field("name", &self.name)
            .field("agent", &self.agent.name())
            .finish()
    }
}
