//! Tests for usage aggregation across calls, turns, and nested runs.

mod common;

use std::sync::Arc;

use baton::agent::Agent;
use baton::agent_loop::Runner;
use baton::config::RunConfig;
use baton::types::{ModelMessage, ModelResponse, ResponseItem, Usage};
use common::ScriptedProvider;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn merged_single_calls_keep_their_breakdown() {
    let mut total = Usage::default();
    for input_tokens in [100_000, 150_000, 80_000] {
        total.add(&Usage::single(input_tokens, 1_000));
    }

    assert_eq!(total.input_tokens, 330_000);
    assert_eq!(total.requests, 3);
    let per_call: Vec<u64> = total
        .request_usage_entries
        .iter()
        .map(|entry| entry.input_tokens)
        .collect();
    assert_eq!(per_call, vec![100_000, 150_000, 80_000]);
    assert!(total
        .request_usage_entries
        .iter()
        .all(|entry| entry.total_tokens == entry.input_tokens + 1_000));
}

#[test]
fn merging_aggregates_carries_their_entries() {
    let mut first = Usage::default();
    first.add(&Usage::single(10, 1));
    first.add(&Usage::single(20, 2));
    let mut second = Usage::default();
    second.add(&Usage::single(30, 3));

    let mut total = Usage::default();
    total.add(&first);
    total.add(&second);

    assert_eq!(total.requests, 3);
    assert_eq!(total.input_tokens, 60);
    assert_eq!(total.request_usage_entries.len(), 3);
}

#[tokio::test]
async fn nested_agent_runs_count_toward_the_caller() {
    let provider = Arc::new(ScriptedProvider::new());
    provider
        .queue_tool_call("c1", "translate", json!({"input": "bonjour"}))
        .queue_text("hello")
        .queue_text("It means hello.");
    let runner = Runner::new(provider.clone());
    let translator = Arc::new(Agent::new("translator"));
    let lead = Arc::new(Agent::new("lead").with_tool(translator.as_tool(
        runner.clone(),
        "translate",
        "Translate French to English",
    )));

    let result = runner
        .run(lead, "What does bonjour mean?")
        .await
        .expect("run should complete");

    assert_eq!(result.final_output, Some(json!("It means hello.")));
    assert_eq!(result.usage.requests, 3);
    assert_eq!(result.usage.request_usage_entries.len(), 3);
    assert_eq!(result.usage.input_tokens, 30);
}

#[tokio::test]
async fn cost_is_dropped_unless_tracked() {
    let priced = || {
        ModelResponse::new(
            vec![ResponseItem::Message(ModelMessage::assistant("ok"))],
            Usage::single(10, 5).with_cost(0.25),
        )
    };
    let agent = Arc::new(Agent::new("accountant"));

    let provider = Arc::new(ScriptedProvider::new());
    provider.queue(priced());
    let untracked = Runner::new(provider)
        .run(agent.clone(), "hi")
        .await
        .expect("run should complete");
    assert_eq!(untracked.usage.cost, None);

    let provider = Arc::new(ScriptedProvider::new());
    provider.queue(priced());
    let tracked = Runner::new(provider)
        .with_config(RunConfig::default().with_track_cost(true))
        .run(agent, "hi")
        .await
        .expect("run should complete");
    assert_eq!(tracked.usage.cost, Some(0.25));
}
