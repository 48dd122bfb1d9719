//! Tool and handoff execution for one turn.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::events::{RunEventEmitter, StreamEvent};
use super::hooks::RunHooks;
use super::items::{last_message_text, RunItem, ToolApprovalItem};
use super::scope::TurnScope;
use super::side_table::CallSignature;
use super::types::{NextStep, ProcessedResponse, SingleStepResult};
use crate::agent::{Agent, FunctionToolResult, Handoff, HandoffInputData};
use crate::config::RunConfig;
use crate::context::RunContext;
use crate::error::{BatonError, Result};
use crate::guardrail::tool::{run_tool_input_guardrails, run_tool_output_guardrails};
use crate::guardrail::{ToolGuardrailData, ToolGuardrailResult};
use crate::tools::apply_patch::ApplyPatchTool;
use crate::tools::arguments::ToolArguments;
use crate::tools::computer::ComputerTool;
use crate::tools::shell::ShellTool;
use crate::tools::tool::{Tool, ToolExecutionContext};
use crate::tools::types::{ApprovalRequirement, ToolUpdateCallback, ToolUpdatePayload};
use crate::tools::validation::validate_against_schema;
use crate::trace::{TraceEvent, Tracer};
use crate::types::items::{ApplyPatchCall, ComputerCall, ModelResponse, ResponseItem, ShellCall};
use crate::types::message::{AgentToolCall, AgentToolResult};

pub(crate) const NOT_APPROVED_MESSAGE: &str = "Tool execution was not approved.";
pub(crate) const MULTIPLE_HANDOFFS_MESSAGE: &str = "Multiple handoffs detected, ignoring this one.";

/// Everything a unit of work needs, shared across one turn.
#[derive(Clone)]
pub(crate) struct ExecutionEnv {
    pub agent: Arc<Agent>,
    pub ctx: RunContext,
    pub config: RunConfig,
    pub tracer: Tracer,
    pub events: RunEventEmitter,
    pub cancel: CancellationToken,
    pub hooks: Arc<dyn RunHooks>,
}

/// What one unit of work produced.
struct UnitOutcome {
    kind: UnitKind,
    guardrail_results: Vec<ToolGuardrailResult>,
}

enum UnitKind {
    Output {
        result: AgentToolResult,
        /// Set for function tools, the only ones a tool-use behavior sees.
        function_tool: Option<String>,
    },
    NeedsApproval(ToolApprovalItem),
    /// A nested run paused; its approvals surface on this run.
    Nested(Vec<ToolApprovalItem>),
}

impl UnitOutcome {
    fn output(result: AgentToolResult, function_tool: Option<String>) -> Self {
        Self {
            kind: UnitKind::Output {
                result,
                function_tool,
            },
            guardrail_results: Vec::new(),
        }
    }

    fn with_guardrail_results(mut self, results: Vec<ToolGuardrailResult>) -> Self {
        self.guardrail_results = results;
        self
    }
}

enum Gate {
    Run,
    Pending(ToolApprovalItem),
    Resolved(AgentToolResult),
}

/// Check a call against its approval requirement and recorded decisions.
fn approval_gate(
    env: &ExecutionEnv,
    requirement: &ApprovalRequirement,
    tool_name: &str,
    call_id: &str,
    arguments: &serde_json::Value,
    raw: &ResponseItem,
) -> Gate {
    if !requirement.is_required(&env.ctx, arguments) {
        return Gate::Run;
    }
    match env.ctx.approval_status(tool_name, call_id) {
        None => Gate::Pending(ToolApprovalItem {
            agent: env.agent.name().to_string(),
            tool_name: tool_name.to_string(),
            call_id: call_id.to_string(),
            arguments: arguments.clone(),
            raw: raw.clone(),
        }),
        Some(false) => {
            let message = env
                .ctx
                .rejection_message(tool_name, call_id)
                .unwrap_or_else(|| NOT_APPROVED_MESSAGE.to_string());
            tracing::debug!(tool = tool_name, call_id, "Tool call rejected");
            Gate::Resolved(AgentToolResult::ok(call_id, serde_json::Value::String(message)))
        }
        Some(true) => match env.ctx.override_output(tool_name, call_id) {
            Some(output) => Gate::Resolved(AgentToolResult::ok(call_id, output)),
            None => Gate::Run,
        },
    }
}

/// Map a handler failure to the result the model sees.
///
/// Framework errors are returned as `Err` and abort the run.
fn failure_result(
    config: &RunConfig,
    tool_name: &str,
    call_id: &str,
    error: BatonError,
) -> Result<AgentToolResult> {
    if error.aborts_run() {
        return Err(error);
    }
    tracing::warn!(tool = tool_name, call_id, error = %error, "Tool failed");
    match error.root() {
        BatonError::McpUpstream {
            server,
            tool,
            message,
        } => Ok(AgentToolResult {
            tool_call_id: call_id.to_string(),
            result: serde_json::json!({
                "error": {
                    "type": "upstream_error",
                    "server": server,
                    "tool": tool,
                    "message": message,
                }
            }),
            is_error: true,
        }),
        _ => Ok(AgentToolResult::error(
            call_id,
            config.format_tool_error(tool_name, &error),
        )),
    }
}

async fn tool_started(env: &ExecutionEnv, tool: &str, call_id: &str, input: &serde_json::Value) {
    tracing::debug!(agent = env.agent.name(), tool, call_id, "Tool started");
    env.hooks.on_tool_start(&env.ctx, &env.agent, tool, call_id).await;
    env.tracer.emit(TraceEvent::ToolStarted {
        agent: env.agent.name().to_string(),
        tool: tool.to_string(),
        call_id: call_id.to_string(),
        input: env.tracer.sensitive(input),
    });
}

async fn tool_ended(env: &ExecutionEnv, tool: &str, result: &AgentToolResult) {
    tracing::debug!(
        agent = env.agent.name(),
        tool,
        call_id = %result.tool_call_id,
        is_error = result.is_error,
        "Tool finished"
    );
    env.tracer.emit(TraceEvent::ToolEnded {
        agent: env.agent.name().to_string(),
        tool: tool.to_string(),
        call_id: result.tool_call_id.clone(),
        is_error: result.is_error,
        output: env.tracer.sensitive(&result.result),
    });
    env.hooks.on_tool_end(&env.ctx, &env.agent, tool, result).await;
}

fn progress_callback(events: &RunEventEmitter, tool_name: &str, call_id: &str) -> Option<ToolUpdateCallback> {
    if !events.is_attached() {
        return None;
    }
    let events = events.clone();
    let (tool_name, call_id) = (tool_name.to_string(), call_id.to_string());
    Some(Arc::new(move |update: ToolUpdatePayload| {
        events.emit(StreamEvent::ToolProgress {
            call_id: call_id.clone(),
            tool_name: tool_name.clone(),
            update,
        })
    }))
}

async fn run_function_tool(
    env: Arc<ExecutionEnv>,
    tool: Arc<dyn Tool>,
    call: AgentToolCall,
    cancel: CancellationToken,
) -> Result<UnitOutcome> {
    let tool_name = tool.name().to_string();
    let function_tool = Some(tool_name.clone());

    let args = match ToolArguments::parse(&call.arguments).and_then(|args| {
        validate_against_schema(args.raw(), &tool.parameters().schema)
            .map_err(BatonError::InvalidArgument)?;
        Ok(args)
    }) {
        Ok(args) => args,
        Err(e) => {
            tracing::warn!(tool = %tool_name, call_id = %call.id, error = %e, "Invalid tool arguments");
            let result = AgentToolResult::error(&call.id, env.config.format_tool_error(&tool_name, &e));
            return Ok(UnitOutcome::output(result, function_tool));
        }
    };

    let raw = ResponseItem::FunctionCall(call.clone());
    match approval_gate(&env, &tool.needs_approval(), &tool_name, &call.id, args.raw(), &raw) {
        Gate::Run => {}
        Gate::Pending(item) => {
            return Ok(UnitOutcome {
                kind: UnitKind::NeedsApproval(item),
                guardrail_results: Vec::new(),
            })
        }
        Gate::Resolved(result) => return Ok(UnitOutcome::output(result, function_tool)),
    }

    tool_started(&env, &tool_name, &call.id, args.raw()).await;
    let mut guardrail_results = Vec::new();
    let data = ToolGuardrailData {
        agent_name: env.agent.name().to_string(),
        tool_name: tool_name.clone(),
        call_id: call.id.clone(),
        arguments: args.raw().clone(),
    };

    let rejected = run_tool_input_guardrails(
        tool.input_guardrails(),
        &env.ctx,
        &data,
        &mut guardrail_results,
        &env.tracer,
    )
    .await?;

    let result = match rejected {
        Some(message) => AgentToolResult::ok(&call.id, serde_json::Value::String(message)),
        None => {
            let exec_ctx = ToolExecutionContext {
                run_context: env.ctx.clone(),
                tool_call_id: Some(call.id.clone()),
                tool_name: Some(tool_name.clone()),
                agent_name: Some(env.agent.name().to_string()),
            };
            let on_update = progress_callback(&env.events, &tool_name, &call.id);
            match tool.execute_ext(&args, &exec_ctx, cancel, on_update).await {
                Ok(value) => match run_tool_output_guardrails(
                    tool.output_guardrails(),
                    &env.ctx,
                    &data,
                    &value,
                    &mut guardrail_results,
                    &env.tracer,
                )
                .await?
                {
                    Some(replacement) => {
                        AgentToolResult::ok(&call.id, serde_json::Value::String(replacement))
                    }
                    None => AgentToolResult::ok(&call.id, value),
                },
                Err(e) => failure_result(&env.config, &tool_name, &call.id, e)?,
            }
        }
    };
    tool_ended(&env, &tool_name, &result).await;

    let signature = CallSignature::new(&tool_name, args.raw(), &call.id);
    if let Some(nested) = env.ctx.nested_results().consume(&signature) {
        if !nested.interruptions.is_empty() {
            tracing::info!(
                tool = %tool_name,
                nested_agent = %nested.agent_name,
                pending = nested.interruptions.len(),
                "Nested run is waiting on approvals"
            );
            return Ok(UnitOutcome {
                kind: UnitKind::Nested(nested.interruptions),
                guardrail_results,
            });
        }
    }

    Ok(UnitOutcome::output(result, function_tool).with_guardrail_results(guardrail_results))
}

async fn run_computer_action(
    env: Arc<ExecutionEnv>,
    computer: ComputerTool,
    call: ComputerCall,
) -> Result<UnitOutcome> {
    let input = serde_json::to_value(&call.action)?;
    tool_started(&env, ComputerTool::NAME, &call.call_id, &input).await;
    let result = match computer.run(&call.action, &env.ctx).await {
        Ok(output) => AgentToolResult::ok(&call.call_id, output),
        Err(e) => failure_result(&env.config, ComputerTool::NAME, &call.call_id, e)?,
    };
    tool_ended(&env, ComputerTool::NAME, &result).await;
    Ok(UnitOutcome::output(result, None))
}

async fn run_shell_call(env: Arc<ExecutionEnv>, shell: ShellTool, call: ShellCall) -> Result<UnitOutcome> {
    let input = serde_json::to_value(&call.action)?;
    let raw = ResponseItem::ShellCall(call.clone());
    match approval_gate(&env, shell.needs_approval(), ShellTool::NAME, &call.call_id, &input, &raw) {
        Gate::Run => {}
        Gate::Pending(item) => {
            return Ok(UnitOutcome {
                kind: UnitKind::NeedsApproval(item),
                guardrail_results: Vec::new(),
            })
        }
        Gate::Resolved(result) => return Ok(UnitOutcome::output(result, None)),
    }

    tool_started(&env, ShellTool::NAME, &call.call_id, &input).await;
    let result = match shell.run(&call).await {
        Ok(output) => AgentToolResult::ok(&call.call_id, output),
        Err(e) => failure_result(&env.config, ShellTool::NAME, &call.call_id, e)?,
    };
    tool_ended(&env, ShellTool::NAME, &result).await;
    Ok(UnitOutcome::output(result, None))
}

async fn run_apply_patch_call(
    env: Arc<ExecutionEnv>,
    editor: ApplyPatchTool,
    call: ApplyPatchCall,
) -> Result<UnitOutcome> {
    let input = serde_json::to_value(&call.operation)?;
    let raw = ResponseItem::ApplyPatchCall(call.clone());
    match approval_gate(
        &env,
        editor.needs_approval(),
        ApplyPatchTool::NAME,
        &call.call_id,
        &input,
        &raw,
    ) {
        Gate::Run => {}
        Gate::Pending(item) => {
            return Ok(UnitOutcome {
                kind: UnitKind::NeedsApproval(item),
                guardrail_results: Vec::new(),
            })
        }
        Gate::Resolved(result) => return Ok(UnitOutcome::output(result, None)),
    }

    tool_started(&env, ApplyPatchTool::NAME, &call.call_id, &input).await;
    let result = match editor.run(&call.operation).await {
        Ok(outcome) => AgentToolResult::ok(&call.call_id, serde_json::to_value(outcome)?),
        Err(e) => failure_result(&env.config, ApplyPatchTool::NAME, &call.call_id, e)?,
    };
    tool_ended(&env, ApplyPatchTool::NAME, &result).await;
    Ok(UnitOutcome::output(result, None))
}

/// Run every pending action of `processed` concurrently.
///
/// Outcomes come back in emission order. The first framework error cancels
/// and drains the remaining units.
async fn run_units(
    env: &Arc<ExecutionEnv>,
    tools: &[Arc<dyn Tool>],
    processed: &ProcessedResponse,
) -> Result<Vec<UnitOutcome>> {
    let mut scope: TurnScope<Result<UnitOutcome>> = TurnScope::with_parent(&env.cancel);

    for call in &processed.functions {
        let tool = tools
            .iter()
            .find(|tool| tool.name() == call.name)
            .cloned()
            .ok_or_else(|| {
                BatonError::model_behavior(format!(
                    "Tool {} not found in agent {}",
                    call.name,
                    env.agent.name()
                ))
            })?;
        scope.spawn(run_function_tool(env.clone(), tool, call.clone(), scope.token()));
    }
    if let Some(computer) = env.agent.computer() {
        for call in &processed.computer_actions {
            scope.spawn(run_computer_action(env.clone(), computer.clone(), call.clone()));
        }
    }
    if let Some(shell) = env.agent.shell() {
        for call in &processed.shell_calls {
            scope.spawn(run_shell_call(env.clone(), shell.clone(), call.clone()));
        }
    }
    if let Some(editor) = env.agent.apply_patch() {
        for call in &processed.apply_patch_calls {
            scope.spawn(run_apply_patch_call(env.clone(), editor.clone(), call.clone()));
        }
    }

    let mut slots: Vec<Option<UnitOutcome>> = std::iter::repeat_with(|| None).take(scope.len()).collect();
    loop {
        let joined = tokio::select! {
            joined = scope.next() => joined,
            _ = env.cancel.cancelled() => {
                let suppressed = scope.cancel_and_drain().await;
                tracing::debug!(count = suppressed.len(), "Run cancelled while tools were running");
                return Err(BatonError::Canceled);
            }
        };
        let Some(joined) = joined else {
            break;
        };
        match joined {
            Ok((index, Ok(outcome))) => slots[index] = Some(outcome),
            Ok((_, Err(e))) | Err(e) => {
                let suppressed = scope.cancel_and_drain().await;
                if !suppressed.is_empty() {
                    tracing::debug!(count = suppressed.len(), "Suppressed errors from cancelled tools");
                }
                return Err(e);
            }
        }
    }
    Ok(slots.into_iter().flatten().collect())
}

/// Execute a processed response and decide what the run does next.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn execute_tools_and_side_effects(
    env: &Arc<ExecutionEnv>,
    tools: &[Arc<dyn Tool>],
    handoffs: &[Handoff],
    original_input: Vec<ResponseItem>,
    pre_step_items: Vec<RunItem>,
    model_response: ModelResponse,
    processed: ProcessedResponse,
) -> Result<SingleStepResult> {
    let agent_name = env.agent.name().to_string();
    let mut new_step_items = processed.new_items.clone();
    let mut interruptions = Vec::new();
    let mut function_results = Vec::new();
    let mut tool_guardrail_results = Vec::new();

    for outcome in run_units(env, tools, &processed).await? {
        tool_guardrail_results.extend(outcome.guardrail_results);
        match outcome.kind {
            UnitKind::Output {
                result,
                function_tool,
            } => {
                if let Some(tool_name) = function_tool {
                    function_results.push(FunctionToolResult {
                        tool_name,
                        call_id: result.tool_call_id.clone(),
                        output: result.result.clone(),
                    });
                }
                new_step_items.push(RunItem::ToolCallOutput {
                    agent: agent_name.clone(),
                    raw: result,
                });
            }
            UnitKind::NeedsApproval(item) => {
                new_step_items.push(RunItem::ToolApproval(item.clone()));
                interruptions.push(item);
            }
            UnitKind::Nested(items) => {
                new_step_items.extend(items.iter().cloned().map(RunItem::ToolApproval));
                interruptions.extend(items);
            }
        }
    }

    let step = |new_step_items, next_step, tool_guardrail_results| SingleStepResult {
        original_input: original_input.clone(),
        model_response: model_response.clone(),
        pre_step_items: pre_step_items.clone(),
        new_step_items,
        next_step,
        tool_guardrail_results,
    };

    if !interruptions.is_empty() {
        tracing::info!(agent = %agent_name, pending = interruptions.len(), "Turn paused for approvals");
        return Ok(step(
            new_step_items,
            NextStep::Interruption(interruptions),
            tool_guardrail_results,
        ));
    }

    if let Some((call, ignored)) = processed.handoffs.split_first() {
        for extra in ignored {
            new_step_items.push(RunItem::ToolCallOutput {
                agent: agent_name.clone(),
                raw: AgentToolResult::ok(
                    &extra.id,
                    serde_json::Value::String(MULTIPLE_HANDOFFS_MESSAGE.to_string()),
                ),
            });
        }
        let handoff = handoffs
            .iter()
            .find(|handoff| handoff.tool_name() == call.name)
            .ok_or_else(|| {
                BatonError::model_behavior(format!(
                    "Handoff {} not found in agent {}",
                    call.name, agent_name
                ))
            })?;
        let arguments = ToolArguments::parse(&call.arguments)
            .map_err(|e| BatonError::model_behavior(format!("Invalid handoff arguments for {}: {e}", call.name)))?;
        let target = handoff.resolve(&env.ctx, arguments.into_value()).await?;

        new_step_items.push(RunItem::HandoffOutput {
            agent: agent_name.clone(),
            raw: AgentToolResult::ok(&call.id, Handoff::transfer_output(target.name())),
            source_agent: agent_name.clone(),
            target_agent: target.name().to_string(),
        });
        env.tracer.emit(TraceEvent::HandoffOccurred {
            from: agent_name.clone(),
            to: target.name().to_string(),
        });
        tracing::info!(from = %agent_name, to = %target.name(), "Handoff");

        let filter = handoff
            .input_filter()
            .or(env.config.handoff_input_filter.as_ref());
        let Some(filter) = filter else {
            return Ok(step(new_step_items, NextStep::Handoff(target), tool_guardrail_results));
        };
        let filtered = filter(HandoffInputData {
            input_history: original_input.clone(),
            pre_handoff_items: pre_step_items.clone(),
            new_items: new_step_items,
        });
        return Ok(SingleStepResult {
            original_input: filtered.input_history,
            model_response,
            pre_step_items: filtered.pre_handoff_items,
            new_step_items: filtered.new_items,
            next_step: NextStep::Handoff(target),
            tool_guardrail_results,
        });
    }

    let decision = env
        .agent
        .tool_use_behavior()
        .decide(&env.ctx, &function_results);
    if decision.is_final_output {
        let output = decision.final_output.unwrap_or(serde_json::Value::Null);
        return Ok(step(new_step_items, NextStep::FinalOutput(output), tool_guardrail_results));
    }

    let next_step = if processed.has_tools_or_approvals_to_run() {
        NextStep::RunAgain
    } else {
        let text = last_message_text(&processed.new_items);
        match (env.agent.output_schema(), text) {
            (Some(schema), Some(text)) => NextStep::FinalOutput(schema.parse(&text)?),
            (Some(_), None) => NextStep::RunAgain,
            (None, text) => NextStep::FinalOutput(serde_json::Value::String(text.unwrap_or_default())),
        }
    };
    Ok(step(new_step_items, next_step, tool_guardrail_results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_loop::turn::process_model_response;
    use crate::tools::tool::AgentTool;
    use crate::tools::types::AgentToolParameters;
    use crate::types::message::ModelMessage;
    use crate::types::usage::Usage;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn env(agent: Agent) -> Arc<ExecutionEnv> {
        Arc::new(ExecutionEnv {
            agent: Arc::new(agent),
            ctx: RunContext::new(),
            config: RunConfig::default(),
            tracer: Tracer::disabled(),
            events: RunEventEmitter::detached(),
            cancel: CancellationToken::new(),
            hooks: Arc::new(crate::agent_loop::hooks::NoopHooks),
        })
    }

    fn weather() -> AgentTool {
        AgentTool::new(
            "get_weather",
            "Current weather",
            AgentToolParameters::object().string("city", "City name", true).build(),
            |args, _| async move { Ok(json!(format!("Sunny in {}", args.get_str("city")?))) },
        )
    }

    async fn execute(env: &Arc<ExecutionEnv>, output: Vec<ResponseItem>) -> SingleStepResult {
        let tools = env.agent.all_tools(&env.ctx).await.expect("tools should resolve");
        let handoffs = env.agent.enabled_handoffs(&env.ctx);
        let response = ModelResponse::new(output, Usage::default());
        let processed = process_model_response(&env.agent, &tools, &handoffs, &response)
            .expect("response should classify");
        execute_tools_and_side_effects(env, &tools, &handoffs, Vec::new(), Vec::new(), response, processed)
            .await
            .expect("turn should execute")
    }

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> ResponseItem {
        ResponseItem::FunctionCall(AgentToolCall::new(id, name, arguments))
    }

    fn outputs(step: &SingleStepResult) -> Vec<serde_json::Value> {
        step.new_step_items
            .iter()
            .filter_map(|item| match item {
                RunItem::ToolCallOutput { raw, .. } => Some(raw.result.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn tool_outputs_keep_emission_order() {
        let env = env(Agent::new("assistant").with_tool(weather()));
        let step = execute(
            &env,
            vec![
                call("c1", "get_weather", json!({"city": "Oakland"})),
                call("c2", "get_weather", json!({"city": "Paris"})),
            ],
        )
        .await;

        assert_eq!(outputs(&step), vec![json!("Sunny in Oakland"), json!("Sunny in Paris")]);
        assert!(matches!(step.next_step, NextStep::RunAgain));
    }

    #[tokio::test]
    async fn undecided_approval_interrupts_without_running() {
        let tool = weather().with_needs_approval(ApprovalRequirement::Always);
        let env = env(Agent::new("assistant").with_tool(tool));
        let step = execute(&env, vec![call("c1", "get_weather", json!({"city": "Oakland"}))]).await;

        let NextStep::Interruption(items) = &step.next_step else {
            panic!("expected an interruption, got {:?}", step.next_step);
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].tool_name, "get_weather");
        assert!(outputs(&step).is_empty());
    }

    #[tokio::test]
    async fn rejected_call_reports_the_rejection() {
        let tool = weather().with_needs_approval(ApprovalRequirement::Always);
        let env = env(Agent::new("assistant").with_tool(tool));
        env.ctx.reject_tool("get_weather", "c1", false, None);

        let step = execute(&env, vec![call("c1", "get_weather", json!({"city": "Oakland"}))]).await;
        assert_eq!(outputs(&step), vec![json!(NOT_APPROVED_MESSAGE)]);
    }

    #[tokio::test]
    async fn invalid_arguments_become_tool_output() {
        let env = env(Agent::new("assistant").with_tool(weather()));
        let step = execute(&env, vec![call("c1", "get_weather", json!({"city": 7}))]).await;

        let text = outputs(&step)[0].as_str().map(str::to_string).expect("output should be text");
        assert!(text.starts_with("An error occurred while running the tool."));
        assert!(text.contains("field 'city' expected type 'string'"));
    }

    #[tokio::test]
    async fn first_handoff_wins() {
        let billing = Arc::new(Agent::new("billing"));
        let refunds = Arc::new(Agent::new("refunds"));
        let env = env(
            Agent::new("triage")
                .with_handoff(billing)
                .with_handoff(refunds),
        );
        let step = execute(
            &env,
            vec![
                call("h1", "transfer_to_billing", json!({})),
                call("h2", "transfer_to_refunds", json!({})),
            ],
        )
        .await;

        let NextStep::Handoff(target) = &step.next_step else {
            panic!("expected a handoff, got {:?}", step.next_step);
        };
        assert_eq!(target.name(), "billing");
        assert_eq!(
            outputs(&step),
            vec![json!(MULTIPLE_HANDOFFS_MESSAGE)]
        );
        assert!(step.new_step_items.iter().any(|item| matches!(
            item,
            RunItem::HandoffOutput { raw, .. } if raw.result == json!({"assistant": "billing"})
        )));
    }

    #[tokio::test]
    async fn plain_text_without_tools_is_final() {
        let env = env(Agent::new("assistant"));
        let step = execute(
            &env,
            vec![ResponseItem::Message(ModelMessage::assistant("All done."))],
        )
        .await;
        assert!(matches!(step.next_step, NextStep::FinalOutput(output) if output == json!("All done.")));
    }

    #[test]
    fn upstream_failures_are_structured() {
        let result = failure_result(
            &RunConfig::default(),
            "docs_search",
            "c1",
            BatonError::McpUpstream {
                server: "docs".into(),
                tool: "search".into(),
                message: "connection reset".into(),
            },
        )
        .expect("upstream failure should not abort");

        assert!(result.is_error);
        assert_eq!(
            result.result,
            json!({"error": {"type": "upstream_error", "server": "docs", "tool": "search", "message": "connection reset"}})
        );
    }

    #[test]
    fn framework_errors_abort() {
        let err = failure_result(&RunConfig::default(), "t", "c1", BatonError::user("bad setup"))
            .expect_err("user errors should abort");
        assert!(matches!(err, BatonError::User(_)));
    }
}
