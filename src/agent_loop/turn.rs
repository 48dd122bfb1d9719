//! Turn processing: classify one model response into run items and pending work.

use std::collections::HashSet;
use std::sync::Arc;

use super::items::RunItem;
use super::types::ProcessedResponse;
use crate::agent::{Agent, Handoff};
use crate::error::{BatonError, Result};
use crate::tools::apply_patch::ApplyPatchTool;
use crate::tools::computer::ComputerTool;
use crate::tools::shell::ShellTool;
use crate::tools::tool::Tool;
use crate::types::items::{McpCall, ModelResponse, ResponseItem};
use crate::types::message::AgentToolResult;

/// Classify every fragment of `response`.
///
/// Each fragment kind has exactly one decoder. Fragments that are not valid
/// model output are a [`BatonError::ModelBehavior`], never skipped.
pub(crate) fn process_model_response(
    agent: &Agent,
    tools: &[Arc<dyn Tool>],
    handoffs: &[Handoff],
    response: &ModelResponse,
) -> Result<ProcessedResponse> {
    let mut processed = ProcessedResponse::default();
    let mut seen_calls = HashSet::new();
    let name = agent.name().to_string();

    for item in &response.output {
        if let Some(call_id) = item.call_id() {
            if !seen_calls.insert(call_id.to_string()) {
                tracing::warn!(call_id, kind = item.kind(), "Skipping duplicate call id in model output");
                continue;
            }
        }

        match item {
            ResponseItem::Message(message) => processed.new_items.push(RunItem::MessageOutput {
                agent: name.clone(),
                raw: message.clone(),
            }),
            ResponseItem::Reasoning(reasoning) => processed.new_items.push(RunItem::Reasoning {
                agent: name.clone(),
                raw: reasoning.clone(),
            }),
            ResponseItem::Compaction(compaction) => processed.new_items.push(RunItem::Compaction {
                agent: name.clone(),
                raw: compaction.clone(),
            }),
            ResponseItem::FunctionCall(call) => {
                processed.tools_used.push(call.name.clone());
                if handoffs.iter().any(|handoff| handoff.tool_name() == call.name) {
                    processed.new_items.push(RunItem::HandoffCall {
                        agent: name.clone(),
                        raw: call.clone(),
                    });
                    processed.handoffs.push(call.clone());
                } else if tools.iter().any(|tool| tool.name() == call.name) {
                    processed.new_items.push(RunItem::ToolCall {
                        agent: name.clone(),
                        raw: item.clone(),
                    });
                    processed.functions.push(call.clone());
                } else {
                    return Err(BatonError::model_behavior(format!(
                        "Tool {} not found in agent {}",
                        call.name, name
                    )));
                }
            }
            ResponseItem::ComputerCall(call) => {
                if agent.computer().is_none() {
                    return Err(BatonError::model_behavior(
                        "Model produced computer action without a computer tool.",
                    ));
                }
                processed.tools_used.push(ComputerTool::NAME.to_string());
                processed.new_items.push(RunItem::ToolCall {
                    agent: name.clone(),
                    raw: item.clone(),
                });
                processed.computer_actions.push(call.clone());
            }
            ResponseItem::ShellCall(call) => {
                if agent.shell().is_none() {
                    return Err(BatonError::model_behavior(
                        "Model produced shell call without a shell tool.",
                    ));
                }
                processed.tools_used.push(ShellTool::NAME.to_string());
                processed.new_items.push(RunItem::ToolCall {
                    agent: name.clone(),
                    raw: item.clone(),
                });
                processed.shell_calls.push(call.clone());
            }
            ResponseItem::ApplyPatchCall(call) => {
                if agent.apply_patch().is_none() {
                    return Err(BatonError::model_behavior(
                        "Model produced apply_patch call without an apply_patch tool.",
                    ));
                }
                processed.tools_used.push(ApplyPatchTool::NAME.to_string());
                processed.new_items.push(RunItem::ToolCall {
                    agent: name.clone(),
                    raw: item.clone(),
                });
                processed.apply_patch_calls.push(call.clone());
            }
            ResponseItem::McpCall(call) => {
                processed.tools_used.push(call.name.clone());
                processed.new_items.push(RunItem::ToolCall {
                    agent: name.clone(),
                    raw: item.clone(),
                });
                processed.new_items.push(RunItem::ToolCallOutput {
                    agent: name.clone(),
                    raw: hosted_call_output(call),
                });
                processed.mcp_calls.push(call.clone());
            }
            ResponseItem::FunctionCallOutput(_) => {
                return Err(BatonError::model_behavior(format!(
                    "Unexpected output item {} from agent {}",
                    item.kind(),
                    name
                )));
            }
        }
    }

    Ok(processed)
}

/// The output of a hosted call, already executed by the provider.
fn hosted_call_output(call: &McpCall) -> AgentToolResult {
    match (&call.error, &call.output) {
        (Some(error), _) => AgentToolResult::error(call.id.clone(), error.clone()),
        (None, Some(output)) => AgentToolResult::ok(call.id.clone(), output.clone()),
        (None, None) => AgentToolResult::ok(call.id.clone(), serde_json::Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::shell::{LocalShellExecutor, ShellTool};
    use crate::tools::tool::AgentTool;
    use crate::tools::types::AgentToolParameters;
    use crate::types::items::{ShellAction, ShellCall};
    use crate::types::message::{AgentToolCall, ModelMessage};
    use crate::types::usage::Usage;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn lookup() -> Arc<dyn Tool> {
        Arc::new(AgentTool::new(
            "lookup",
            "look things up",
            AgentToolParameters::empty(),
            |_, _| async { Ok(json!("found")) },
        ))
    }

    fn response(output: Vec<ResponseItem>) -> ModelResponse {
        ModelResponse::new(output, Usage::default())
    }

    fn call(id: &str, name: &str) -> ResponseItem {
        ResponseItem::FunctionCall(AgentToolCall::new(id, name, json!({})))
    }

    #[test]
    fn calls_are_split_into_tools_and_handoffs() {
        let billing = Arc::new(Agent::new("billing"));
        let agent = Agent::new("triage");
        let handoffs = vec![Handoff::to(billing)];

        let processed = process_model_response(
            &agent,
            &[lookup()],
            &handoffs,
            &response(vec![
                ResponseItem::Message(ModelMessage::assistant("one moment")),
                call("c1", "lookup"),
                call("c2", "transfer_to_billing"),
            ]),
        )
        .expect("response should classify");

        assert_eq!(processed.new_items.len(), 3);
        assert_eq!(processed.functions.len(), 1);
        assert_eq!(processed.handoffs.len(), 1);
        assert_eq!(processed.tools_used, vec!["lookup", "transfer_to_billing"]);
        assert!(processed.has_tools_or_approvals_to_run());
    }

    #[test]
    fn unknown_tool_is_a_model_behavior_error() {
        let err = process_model_response(
            &Agent::new("triage"),
            &[lookup()],
            &[],
            &response(vec![call("c1", "delete_everything")]),
        )
        .expect_err("unknown tool should fail");

        assert!(matches!(
            err,
            BatonError::ModelBehavior(message)
                if message == "Tool delete_everything not found in agent triage"
        ));
    }

    #[test]
    fn capability_calls_require_the_capability() {
        let shell_call = ResponseItem::ShellCall(ShellCall {
            call_id: "s1".into(),
            action: ShellAction {
                commands: vec!["ls".into()],
                ..Default::default()
            },
        });

        let err = process_model_response(
            &Agent::new("ops"),
            &[],
            &[],
            &response(vec![shell_call.clone()]),
        )
        .expect_err("shell call without shell should fail");
        assert!(matches!(
            err,
            BatonError::ModelBehavior(message)
                if message == "Model produced shell call without a shell tool."
        ));

        let agent = Agent::new("ops").with_shell(ShellTool::new(Arc::new(LocalShellExecutor::new())));
        let processed = process_model_response(&agent, &[], &[], &response(vec![shell_call]))
            .expect("shell call should classify");
        assert_eq!(processed.shell_calls.len(), 1);
    }

    #[test]
    fn hosted_calls_carry_their_result() {
        let processed = process_model_response(
            &Agent::new("research"),
            &[],
            &[],
            &response(vec![ResponseItem::McpCall(McpCall {
                id: "m1".into(),
                server_label: "docs".into(),
                name: "search".into(),
                arguments: json!({"q": "rust"}),
                output: None,
                error: Some("index offline".into()),
            })]),
        )
        .expect("hosted call should classify");

        assert_eq!(processed.new_items.len(), 2);
        assert!(matches!(
            &processed.new_items[1],
            RunItem::ToolCallOutput { raw, .. } if raw.is_error
        ));
        assert!(!processed.has_tools_or_approvals_to_run());
    }

    #[test]
    fn stray_tool_output_is_rejected() {
        let err = process_model_response(
            &Agent::new("triage"),
            &[],
            &[],
            &response(vec![ResponseItem::FunctionCallOutput(AgentToolResult::ok(
                "c1",
                json!("x"),
            ))]),
        )
        .expect_err("tool output is not model output");
        assert!(matches!(err, BatonError::ModelBehavior(message) if message.starts_with("Unexpected output item")));
    }

    #[test]
    fn duplicate_call_ids_run_once() {
        let processed = process_model_response(
            &Agent::new("triage"),
            &[lookup()],
            &[],
            &response(vec![call("c1", "lookup"), call("c1", "lookup")]),
        )
        .expect("duplicates should be tolerated");
        assert_eq!(processed.functions.len(), 1);
        assert_eq!(processed.new_items.len(), 1);
    }
}
