//! Lifecycle callbacks for one run.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::Agent;
use crate::context::RunContext;
use crate::types::items::{ModelResponse, ResponseItem};
use crate::types::message::AgentToolResult;

/// Observes a run as it moves between agents, model calls and tools.
///
/// Every method defaults to doing nothing. Hooks are awaited inline, so a
/// slow hook slows the run.
#[async_trait]
pub trait RunHooks: Send + Sync {
    /// An agent is about to take its first turn, at run start or after a handoff.
    async fn on_agent_start(&self, _ctx: &RunContext, _agent: &Agent) {}

    /// `agent` produced the run's final output.
    async fn on_agent_end(&self, _ctx: &RunContext, _agent: &Agent, _output: &serde_json::Value) {}

    async fn on_handoff(&self, _ctx: &RunContext, _from: &Agent, _to: &Agent) {}

    /// Called with exactly what the model will receive.
    async fn on_llm_start(
        &self,
        _ctx: &RunContext,
        _agent: &Agent,
        _system_prompt: Option<&str>,
        _input: &[ResponseItem],
    ) {
    }

    async fn on_llm_end(&self, _ctx: &RunContext, _agent: &Agent, _response: &ModelResponse) {}

    async fn on_tool_start(&self, _ctx: &RunContext, _agent: &Agent, _tool: &str, _call_id: &str) {}

    async fn on_tool_end(
        &self,
        _ctx: &RunContext,
        _agent: &Agent,
        _tool: &str,
        _result: &AgentToolResult,
    ) {
    }
}

/// Shared hooks, so a caller can keep a handle on what it passes in.
#[async_trait]
impl<H: RunHooks + ?Sized> RunHooks for Arc<H> {
    async fn on_agent_start(&self, ctx: &RunContext, agent: &Agent) {
        (**self).on_agent_start(ctx, agent).await
    }

    async fn on_agent_end(&self, ctx: &RunContext, agent: &Agent, output: &serde_json::Value) {
        (**self).on_agent_end(ctx, agent, output).await
    }

    async fn on_handoff(&self, ctx: &RunContext, from: &Agent, to: &Agent) {
        (**self).on_handoff(ctx, from, to).await
    }

    async fn on_llm_start(
        &self,
        ctx: &RunContext,
        agent: &Agent,
        system_prompt: Option<&str>,
        input: &[ResponseItem],
    ) {
        (**self).on_llm_start(ctx, agent, system_prompt, input).await
    }

    async fn on_llm_end(&self, ctx: &RunContext, agent: &Agent, response: &ModelResponse) {
        (**self).on_llm_end(ctx, agent, response).await
    }

    async fn on_tool_start(&self, ctx: &RunContext, agent: &Agent, tool: &str, call_id: &str) {
        (**self).on_tool_start(ctx, agent, tool, call_id).await
    }

    async fn on_tool_end(&self, ctx: &RunContext, agent: &Agent, tool: &str, result: &AgentToolResult) {
        (**self).on_tool_end(ctx, agent, tool, result).await
    }
}

/// Hooks used when the caller supplies none.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct NoopHooks;

impl RunHooks for NoopHooks {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct HandoffLog(Mutex<Vec<String>>);

    #[async_trait]
    impl RunHooks for HandoffLog {
        async fn on_handoff(&self, _ctx: &RunContext, from: &Agent, to: &Agent) {
            self.0
                .lock()
                .unwrap()
                .push(format!("{} -> {}", from.name(), to.name()));
        }
    }

    #[tokio::test]
    async fn unimplemented_hooks_do_nothing() {
        let hooks = HandoffLog::default();
        let (triage, billing) = (Agent::new("triage"), Agent::new("billing"));
        let ctx = RunContext::new();

        hooks.on_agent_start(&ctx, &triage).await;
        hooks.on_handoff(&ctx, &triage, &billing).await;
        NoopHooks.on_agent_end(&ctx, &billing, &serde_json::json!("done")).await;

        assert_eq!(*hooks.0.lock().unwrap(), vec!["triage -> billing".to_string()]);
    }
}
