//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::arguments::ToolArguments;
use super::registry::ToolSpec;
use super::types::{AgentToolParameters, ApprovalRequirement, ToolUpdateCallback};
use crate::context::RunContext;
use crate::error::BatonError;
use crate::guardrail::{ToolInputGuardrail, ToolOutputGuardrail};

/// Context available during tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    /// The run's shared context.
    pub run_context: RunContext,
    /// Tool call id (if provided by the model).
    pub tool_call_id: Option<String>,
    /// Tool name as requested by the model.
    pub tool_name: Option<String>,
    /// Agent that requested the call.
    pub agent_name: Option<String>,
}

/// Core tool trait -- implement to create custom tools.
///
/// Existing implementations only need [`Tool::execute`]. The run loop calls
/// [`Tool::execute_ext`] which delegates to `execute` by default. Override
/// `execute_ext` to support cancellation tokens and streaming updates.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    /// Human-readable label for UI display. Defaults to the name.
    fn label(&self) -> &str {
        self.name()
    }

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema parameters.
    fn parameters(&self) -> &AgentToolParameters;

    /// Declaration sent to the provider.
    fn spec(&self) -> ToolSpec {
        ToolSpec::function(self.name(), self.description(), self.parameters().schema.clone())
    }

    /// Whether a call needs caller approval before it runs.
    fn needs_approval(&self) -> ApprovalRequirement {
        ApprovalRequirement::Never
    }

    /// Checks run on parsed arguments before the tool executes.
    fn input_guardrails(&self) -> &[ToolInputGuardrail] {
        &[]
    }

    /// Checks run on the result after the tool executes.
    fn output_guardrails(&self) -> &[ToolOutputGuardrail] {
        &[]
    }

    /// Disabled tools are hidden from the model for this run.
    fn is_enabled(&self, _ctx: &RunContext) -> bool {
        true
    }

    /// Execute the tool with parsed arguments.
    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, BatonError>;

    /// Extended execute with cancellation and streaming updates.
    ///
    /// The default implementation ignores `cancel` and `on_update`, delegating
    /// to [`Tool::execute`].
    async fn execute_ext(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
        _cancel: CancellationToken,
        _on_update: Option<ToolUpdateCallback>,
    ) -> Result<serde_json::Value, BatonError> {
        self.execute(args, ctx).await
    }
}

/// Type alias for the tool handler function.
type ToolHandler = dyn Fn(
        ToolArguments,
        ToolExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, BatonError>> + Send>>
    + Send
    + Sync;

/// Closure-based tool for quick tool creation.
pub struct AgentTool {
    name: String,
    description: String,
    parameters: AgentToolParameters,
    handler: Arc<ToolHandler>,
    approval: ApprovalRequirement,
    input_guardrails: Vec<ToolInputGuardrail>,
    output_guardrails: Vec<ToolOutputGuardrail>,
}

impl AgentTool {
    /// Create a tool from a closure.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: AgentToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, BatonError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
            approval: ApprovalRequirement::Never,
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
        }
    }

    pub fn with_needs_approval(mut self, approval: ApprovalRequirement) -> Self {
        self.approval = approval;
        self
    }

    pub fn with_input_guardrail(mut self, guardrail: ToolInputGuardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: ToolOutputGuardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }
}

#[async_trait]
impl Tool for AgentTool {
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

    fn input_guardrails(&self) -> &[ToolInputGuardrail] {
        &self.input_guardrails
    }

    fn output_guardrails(&self) -> &[ToolOutputGuardrail] {
        &self.output_guardrails
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, BatonError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("approval", &self.approval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn closure_tool_receives_arguments_and_context() {
        let tool = AgentTool::new(
            "echo",
            "echo the input",
            AgentToolParameters::object().string("text", "text", true).build(),
            |args, ctx: ToolExecutionContext| async move {
                Ok(json!({
                    "text": args.get_str("text")?,
                    "call": ctx.tool_call_id,
                }))
            },
        );
        let ctx = ToolExecutionContext {
            tool_call_id: Some("call_1".into()),
            ..Default::default()
        };

        let result = tool
            .execute_ext(
                &ToolArguments::new(json!({"text": "hi"})),
                &ctx,
                CancellationToken::new(),
                None,
            )
            .await
            .expect("echo should succeed");

        assert_eq!(result, json!({"text": "hi", "call": "call_1"}));
        assert!(matches!(tool.needs_approval(), ApprovalRequirement::Never));
        assert_eq!(tool.spec().kind, "function");
    }
}
