//! Tests for suspended run state: serialization, restore, and sticky decisions.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use baton::agent::{Agent, Handoff};
use baton::agent_loop::{RunOptions, RunState, RunStatus, Runner, SCHEMA_VERSION};
use baton::context::RunContext;
use baton::error::BatonError;
use baton::tools::{AgentTool, AgentToolParameters, ApprovalRequirement};
use baton::types::{AgentToolCall, ModelResponse, ResponseItem, Usage};
use common::{tool_outputs, ScriptedProvider};
use pretty_assertions::assert_eq;
use serde_json::json;

fn refund_tool() -> AgentTool {
    AgentTool::new(
        "issue_refund",
        "Refund an order",
        AgentToolParameters::object()
            .string("order", "Order id", true)
            .build(),
        |args, _| async move { Ok(json!(format!("refunded {}", args.get_str("order")?))) },
    )
    .with_needs_approval(ApprovalRequirement::Always)
}

fn support_desk() -> (Arc<Agent>, Arc<Agent>) {
    let refunds = Arc::new(
        Agent::new("refunds")
            .with_instructions("Issue refunds.")
            .with_tool(refund_tool()),
    );
    let triage = Arc::new(Agent::new("triage").with_handoff(Handoff::to(refunds.clone())));
    (triage, refunds)
}

#[tokio::test]
async fn state_restored_after_handoff_resumes_with_the_specialist() {
    let provider = Arc::new(ScriptedProvider::new());
    provider
        .queue_tool_call("h1", "transfer_to_refunds", json!({}))
        .queue_tool_call("r1", "issue_refund", json!({"order": "A-17"}))
        .queue_text("Your refund for A-17 is on its way.");
    let (triage, _) = support_desk();
    let runner = Runner::new(provider.clone());

    let paused = runner
        .run(triage.clone(), "Refund order A-17 please")
        .await
        .expect("run should suspend");
    assert_eq!(paused.last_agent.name(), "refunds");
    assert_eq!(paused.usage.requests, 2);

    let json = paused.to_state().to_json().expect("state should serialize");
    assert_eq!(json["$schemaVersion"], SCHEMA_VERSION);

    let restored = RunState::from_json(triage, json).expect("state should restore");
    assert_eq!(restored.current_agent().name(), "refunds");
    assert_eq!(restored.current_turn(), 2);
    assert_eq!(restored.usage().requests, 2);
    let pending = restored.interruptions()[0].clone();
    restored.approve(&pending, false);

    let finished = runner
        .resume(restored, RunOptions::default())
        .await
        .expect("resumed run should complete");

    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(finished.usage.requests, 3);
    let last = provider.requests().pop().expect("three requests expected");
    assert_eq!(last.system_instructions.as_deref(), Some("Issue refunds."));
    assert_eq!(
        tool_outputs(&last).last().map(String::as_str),
        Some("refunded A-17")
    );
}

#[tokio::test]
async fn always_approval_covers_later_calls() {
    let provider = Arc::new(ScriptedProvider::new());
    provider
        .queue_tool_call("r1", "issue_refund", json!({"order": "A-1"}))
        .queue_tool_call("r2", "issue_refund", json!({"order": "A-2"}))
        .queue_text("Both refunded.");
    let (_, refunds) = support_desk();
    let runner = Runner::new(provider.clone());

    let paused = runner
        .run(refunds, "Refund A-1 and A-2")
        .await
        .expect("run should suspend");
    let state = paused.to_state();
    state.approve(&paused.interruptions[0], true);

    let finished = runner
        .resume(state, RunOptions::default())
        .await
        .expect("later calls should not need approval");

    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(finished.final_output, Some(json!("Both refunded.")));
}

#[tokio::test]
async fn approval_with_output_skips_the_tool() {
    let provider = Arc::new(ScriptedProvider::new());
    provider
        .queue_tool_call("r1", "issue_refund", json!({"order": "A-9"}))
        .queue_text("Handled manually.");
    let (_, refunds) = support_desk();
    let runner = Runner::new(provider.clone());

    let paused = runner.run(refunds, "Refund A-9").await.expect("run should suspend");
    let state = paused.to_state();
    state.approve_with_output(&paused.interruptions[0], json!("refund issued by a human"));
    runner
        .resume(state, RunOptions::default())
        .await
        .expect("resumed run should complete");

    assert_eq!(
        tool_outputs(&provider.requests()[1]),
        vec!["refund issued by a human"]
    );
}

#[tokio::test]
async fn completed_runs_cannot_be_resumed() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.queue_text("done");
    let runner = Runner::new(provider);

    let result = runner
        .run(Arc::new(Agent::new("assistant")), "hi")
        .await
        .expect("run should complete");
    let err = runner
        .resume(result.to_state(), RunOptions::default())
        .await
        .expect_err("completed state should not resume");

    assert!(matches!(err.root(), BatonError::InvalidState(_)));
}

#[test]
fn unsupported_schema_versions_are_rejected() {
    let (triage, _) = support_desk();
    let err = RunState::from_json(triage, json!({"$schemaVersion": "0.9"}))
        .expect_err("old versions should be rejected");

    assert_eq!(
        err.to_string(),
        "User error: Run state schema version 0.9 is not supported. Please use version 1.0"
    );
}

#[derive(Debug)]
struct Tenant(&'static str);

fn tenant_tool() -> AgentTool {
    AgentTool::new(
        "tenant_report",
        "Report for the current tenant",
        AgentToolParameters::empty(),
        |_, ctx| async move {
            let tenant = ctx
                .run_context
                .value::<Tenant>()
                .map(|tenant| tenant.0)
                .unwrap_or("unknown");
            Ok(json!(tenant))
        },
    )
    .with_needs_approval(ApprovalRequirement::Always)
}

#[tokio::test]
async fn caller_value_returns_after_a_serialized_resume() {
    for reattach_on_state in [false, true] {
        let provider = Arc::new(ScriptedProvider::new());
        provider
            .queue_tool_call("t1", "tenant_report", json!({}))
            .queue_text("Report sent.");
        let agent = Arc::new(Agent::new("reporter").with_tool(tenant_tool()));
        let runner = Runner::new(provider.clone());

        let paused = runner
            .run_with(
                agent.clone(),
                "send the report",
                RunOptions::default().with_context(RunContext::new().with_value(Tenant("acme"))),
            )
            .await
            .expect("run should suspend");
        let state = paused.to_state();
        state.approve(&paused.interruptions[0], false);
        let text = state.to_string().expect("state should serialize");

        let restored = RunState::from_str(agent, &text).expect("state should restore");
        let (restored, options) = if reattach_on_state {
            (restored.with_context_value(Tenant("acme")), RunOptions::default())
        } else {
            (
                restored,
                RunOptions::default().with_context(RunContext::new().with_value(Tenant("acme"))),
            )
        };
        runner
            .resume(restored, options)
            .await
            .expect("resumed run should complete");

        assert_eq!(tool_outputs(&provider.requests()[1]), vec!["acme"]);
    }
}

fn worker(log_calls: Arc<AtomicUsize>) -> Arc<Agent> {
    let log = AgentTool::new("log", "Write a log line", AgentToolParameters::empty(), move |_, _| {
        let log_calls = log_calls.clone();
        async move {
            log_calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!("logged"))
        }
    });
    let delete = AgentTool::new("delete", "Delete old files", AgentToolParameters::empty(), |_, _| async {
        Ok(json!("deleted"))
    })
    .with_needs_approval(ApprovalRequirement::Always);
    Arc::new(Agent::new("worker").with_tool(log).with_tool(delete))
}

#[tokio::test]
async fn paused_nested_run_resumes_where_it_stopped() {
    let provider = Arc::new(ScriptedProvider::new());
    provider
        .queue_tool_call("c1", "cleanup", json!({"input": "clean up"}))
        .queue(ModelResponse::new(
            vec![
                ResponseItem::FunctionCall(AgentToolCall::new("l1", "log", json!({}))),
                ResponseItem::FunctionCall(AgentToolCall::new("d1", "delete", json!({}))),
            ],
            Usage::single(10, 5),
        ))
        .queue_text("cleaned")
        .queue_text("All done.");
    let runner = Runner::new(provider.clone());
    let log_calls = Arc::new(AtomicUsize::new(0));
    let lead = Arc::new(Agent::new("lead").with_tool(worker(log_calls.clone()).as_tool(
        runner.clone(),
        "cleanup",
        "Clean up old files",
    )));

    let paused = runner
        .run(lead.clone(), "tidy the disk")
        .await
        .expect("run should suspend");
    assert_eq!(paused.status, RunStatus::Suspended);
    assert_eq!(paused.interruptions.len(), 1);
    assert_eq!(paused.interruptions[0].tool_name, "delete");
    assert_eq!(log_calls.load(Ordering::SeqCst), 1);

    let text = paused.to_state().to_string().expect("state should serialize");
    let restored = RunState::from_str(lead, &text).expect("state should restore");
    restored.approve(&restored.interruptions()[0].clone(), true);

    let finished = runner
        .resume(restored, RunOptions::default())
        .await
        .expect("resumed run should complete");

    assert_eq!(finished.final_output, Some(json!("All done.")));
    assert_eq!(log_calls.load(Ordering::SeqCst), 1);
    let requests = provider.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(tool_outputs(&requests[2]), vec!["logged", "deleted"]);
    assert_eq!(tool_outputs(&requests[3]), vec!["cleaned"]);
    assert_eq!(provider.remaining(), 0);
}
