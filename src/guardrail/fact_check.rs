//! Output guardrail that asks a verifier agent whether the answer is supported.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{GuardrailFunctionOutput, OutputGuardrail};
use crate::agent::Agent;
use crate::agent_loop::runner::{RunOptions, Runner};
use crate::context::RunContext;
use crate::error::{BatonError, Result};

/// What the verifier agent must answer with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheckVerdict {
    pub supported: bool,
    #[serde(default)]
    pub reason: String,
}

impl FactCheckVerdict {
    fn parse(output: &serde_json::Value) -> Result<Self> {
        let parsed = match output {
            serde_json::Value::String(text) => serde_json::from_str(text.trim()),
            other => serde_json::from_value(other.clone()),
        };
        parsed.map_err(|e| {
            BatonError::model_behavior(format!(
                "Fact-check verifier returned an invalid verdict: {e}"
            ))
        })
    }
}

type EvidenceFn = dyn Fn(&RunContext) -> serde_json::Value + Send + Sync;

/// Trips when a verifier agent finds the output unsupported by the evidence.
#[derive(Clone)]
pub struct FactCheckingGuardrail {
    name: String,
    verifier: Arc<Agent>,
    runner: Runner,
    evidence: Arc<EvidenceFn>,
}

impl FactCheckingGuardrail {
    pub fn new(name: impl Into<String>, verifier: Arc<Agent>, runner: Runner) -> Self {
        Self {
            name: name.into(),
            verifier,
            runner,
            evidence: Arc::new(|_| serde_json::Value::Null),
        }
    }

    /// Fixed evidence passed to the verifier alongside the output.
    pub fn with_evidence(mut self, evidence: serde_json::Value) -> Self {
        self.evidence = Arc::new(move |_| evidence.clone());
        self
    }

    /// Evidence computed from the run context at check time.
    pub fn with_evidence_fn<F>(mut self, evidence: F) -> Self
    where
        F: Fn(&RunContext) -> serde_json::Value + Send + Sync + 'static,
    {
        self.evidence = Arc::new(evidence);
        self
    }

    pub async fn check(&self, ctx: &RunContext, output: &serde_json::Value) -> Result<FactCheckVerdict> {
        let request = serde_json::json!({
            "output": output,
            "evidence": (self.evidence)(ctx),
        });
        let result = self
            .runner
            .run_with(
                self.verifier.clone(),
                request.to_string(),
                RunOptions::default().with_context(ctx.clone()),
            )
            .await?;

        let verdict_value = result.final_output.ok_or_else(|| {
            BatonError::model_behavior("Fact-check verifier produced no final output")
        })?;
        FactCheckVerdict::parse(&verdict_value)
    }

    pub fn into_output_guardrail(self) -> OutputGuardrail {
        let name = self.name.clone();
        let checker = Arc::new(self);
        OutputGuardrail::new(name, move |ctx, _agent, output| {
            let checker = checker.clone();
            async move {
                let verdict = checker.check(&ctx, &output).await?;
                let info = serde_json::to_value(&verdict)?;
                if verdict.supported {
                    Ok(GuardrailFunctionOutput::passed(info))
                } else {
                    tracing::info!(reason = %verdict.reason, "Fact check failed");
                    Ok(GuardrailFunctionOutput::tripwire(info))
                }
            }
        })
    }
}

impl std::fmt::Debug for FactCheckingGuardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactCheckingGuardrail")
            .field("name", &self.name)
            .field("verifier", &self.verifier.name())
            .finish()
    }
}
