//! Guardrails wrapped around a single tool invocation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::{BatonError, Result};
use crate::trace::{GuardrailKind, TraceEvent, Tracer};

/// The call a tool guardrail is looking at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolGuardrailData {
    pub agent_name: String,
    pub tool_name: String,
    pub call_id: String,
    pub arguments: serde_json::Value,
}

/// What the run does with a tool guardrail's verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolGuardrailBehavior {
    #[default]
    Allow,
    /// Skip the tool (input) or replace its output (output) with `message`.
    RejectContent { message: String },
    /// Abort the run with a tripwire error.
    RaiseException,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolGuardrailFunctionOutput {
    #[serde(default)]
    pub output_info: serde_json::Value,
    #[serde(default)]
    pub behavior: ToolGuardrailBehavior,
}

impl ToolGuardrailFunctionOutput {
    pub fn allow(output_info: serde_json::Value) -> Self {
        Self {
            output_info,
            behavior: ToolGuardrailBehavior::Allow,
        }
    }

    pub fn reject_content(message: impl Into<String>, output_info: serde_json::Value) -> Self {
        Self {
            output_info,
            behavior: ToolGuardrailBehavior::RejectContent {
                message: message.into(),
            },
        }
    }

    pub fn raise_exception(output_info: serde_json::Value) -> Self {
        Self {
            output_info,
            behavior: ToolGuardrailBehavior::RaiseException,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolGuardrailResult {
    pub guardrail: String,
    pub tool_name: String,
    pub call_id: String,
    pub output: ToolGuardrailFunctionOutput,
}

type ToolInputFn = dyn Fn(RunContext, ToolGuardrailData) -> BoxFuture<'static, Result<ToolGuardrailFunctionOutput>>
    + Send
    + Sync;

type ToolOutputFn = dyn Fn(RunContext, ToolGuardrailData, serde_json::Value) -> BoxFuture<'static, Result<ToolGuardrailFunctionOutput>>
    + Send
    + Sync;

/// Runs on the parsed arguments before the tool executes.
#[derive(Clone)]
pub struct ToolInputGuardrail {
    name: String,
    func: Arc<ToolInputFn>,
}

impl ToolInputGuardrail {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(RunContext, ToolGuardrailData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolGuardrailFunctionOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |ctx, data| Box::pin(func(ctx, data))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ToolInputGuardrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolInputGuardrail")
            .field("name", &self.name)
            .finish()
    }
}

/// Runs on the tool's result after it executes.
#[derive(Clone)]
pub struct ToolOutputGuardrail {
    name: String,
    func: Arc<ToolOutputFn>,
}

impl ToolOutputGuardrail {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(RunContext, ToolGuardrailData, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolGuardrailFunctionOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |ctx, data, output| Box::pin(func(ctx, data, output))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ToolOutputGuardrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolOutputGuardrail")
            .field("name", &self.name)
            .finish()
    }
}

/// Evaluate input guardrails in order.
///
/// Returns the rejection message if one rejected the call.
pub(crate) async fn run_tool_input_guardrails(
    guardrails: &[ToolInputGuardrail],
    ctx: &RunContext,
    data: &ToolGuardrailData,
    results: &mut Vec<ToolGuardrailResult>,
    tracer: &Tracer,
) -> Result<Option<String>> {
    for guardrail in guardrails {
        let output = (guardrail.func)(ctx.clone(), data.clone()).await?;
        tracer.emit(TraceEvent::GuardrailEvaluated {
            kind: GuardrailKind::ToolInput,
            name: guardrail.name.clone(),
            triggered: output.behavior != ToolGuardrailBehavior::Allow,
        });
        let behavior = output.behavior.clone();
        results.push(ToolGuardrailResult {
            guardrail: guardrail.name.clone(),
            tool_name: data.tool_name.clone(),
            call_id: data.call_id.clone(),
            output: output.clone(),
        });

        match behavior {
            ToolGuardrailBehavior::Allow => {}
            ToolGuardrailBehavior::RejectContent { message } => {
                tracing::debug!(guardrail = %guardrail.name, tool = %data.tool_name, "Tool input rejected");
                return Ok(Some(message));
            }
            ToolGuardrailBehavior::RaiseException => {
                return Err(BatonError::ToolInputGuardrailTripwire {
                    guardrail: guardrail.name.clone(),
                    tool_name: data.tool_name.clone(),
                    output_info: output.output_info,
                });
            }
        }
    }
    Ok(None)
}

/// Evaluate output guardrails in order.
///
/// Returns the replacement output if one rejected the result.
pub(crate) async fn run_tool_output_guardrails(
    guardrails: &[ToolOutputGuardrail],
    ctx: &RunContext,
    data: &ToolGuardrailData,
    output: &serde_json::Value,
    results: &mut Vec<ToolGuardrailResult>,
    tracer: &Tracer,
) -> Result<Option<String>> {
    for guardrail in guardrails {
        let verdict = (guardrail.func)(ctx.clone(), data.clone(), output.clone()).await?;
        tracer.emit(TraceEvent::GuardrailEvaluated {
            kind: GuardrailKind::ToolOutput,
            name: guardrail.name.clone(),
            triggered: verdict.behavior != ToolGuardrailBehavior::Allow,
        });
        let behavior = verdict.behavior.clone();
        results.push(ToolGuardrailResult {
            guardrail: guardrail.name.clone(),
            tool_name: data.tool_name.clone(),
            call_id: data.call_id.clone(),
            output: verdict.clone(),
        });

        match behavior {
            ToolGuardrailBehavior::Allow => {}
            ToolGuardrailBehavior::RejectContent { message } => {
                tracing::debug!(guardrail = %guardrail.name, tool = %data.tool_name, "Tool output replaced");
                return Ok(Some(message));
            }
            ToolGuardrailBehavior::RaiseException => {
                return Err(BatonError::ToolOutputGuardrailTripwire {
                    guardrail: guardrail.name.clone(),
                    tool_name: data.tool_name.clone(),
                    output_info: verdict.output_info,
                });
            }
        }
    }
    Ok(None)
}
