//! Guardrails: checks that run alongside the agent and can abort the run.

pub mod debounce;
pub mod fact_check;
pub mod tool;

pub use debounce::OutputDebouncer;
pub use fact_check::{FactCheckVerdict, FactCheckingGuardrail};
pub use tool::{
    ToolGuardrailBehavior, ToolGuardrailData, ToolGuardrailFunctionOutput, ToolGuardrailResult,
    ToolInputGuardrail, ToolOutputGuardrail,
};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::agent_loop::scope::TurnScope;
use crate::context::RunContext;
use crate::error::{BatonError, Result};
use crate::trace::{GuardrailKind, TraceEvent, Tracer};
use crate::types::items::ResponseItem;

/// What a guardrail function reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardrailFunctionOutput {
    /// Free-form details about the check.
    #[serde(default)]
    pub output_info: serde_json::Value,
    /// `true` aborts the run.
    pub tripwire_triggered: bool,
}

impl GuardrailFunctionOutput {
    pub fn passed(output_info: serde_json::Value) -> Self {
        Self {
            output_info,
            tripwire_triggered: false,
        }
    }

    pub fn tripwire(output_info: serde_json::Value) -> Self {
        Self {
            output_info,
            tripwire_triggered: true,
        }
    }
}

type InputGuardrailFn = dyn Fn(RunContext, Arc<Agent>, Vec<ResponseItem>) -> BoxFuture<'static, Result<GuardrailFunctionOutput>>
    + Send
    + Sync;

type OutputGuardrailFn = dyn Fn(RunContext, Arc<Agent>, serde_json::Value) -> BoxFuture<'static, Result<GuardrailFunctionOutput>>
    + Send
    + Sync;

/// Checks the run input before the first model call.
#[derive(Clone)]
pub struct InputGuardrail {
    name: String,
    func: Arc<InputGuardrailFn>,
}

impl InputGuardrail {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(RunContext, Arc<Agent>, Vec<ResponseItem>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GuardrailFunctionOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |ctx, agent, input| Box::pin(func(ctx, agent, input))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(
        &self,
        ctx: RunContext,
        agent: Arc<Agent>,
        input: Vec<ResponseItem>,
    ) -> Result<InputGuardrailResult> {
        let output = (self.func)(ctx, agent, input).await?;
        Ok(InputGuardrailResult {
            guardrail: self.name.clone(),
            output,
        })
    }
}

impl fmt::Debug for InputGuardrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputGuardrail")
            .field("name", &self.name)
            .finish()
    }
}

/// Checks the final output before it is returned.
#[derive(Clone)]
pub struct OutputGuardrail {
    name: String,
    func: Arc<OutputGuardrailFn>,
}

impl OutputGuardrail {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(RunContext, Arc<Agent>, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GuardrailFunctionOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |ctx, agent, output| Box::pin(func(ctx, agent, output))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(
        &self,
        ctx: RunContext,
        agent: Arc<Agent>,
        agent_output: serde_json::Value,
    ) -> Result<OutputGuardrailResult> {
        let agent_name = agent.name().to_string();
        let output = (self.func)(ctx, agent, agent_output.clone()).await?;
        Ok(OutputGuardrailResult {
            guardrail: self.name.clone(),
            agent_name,
            agent_output,
            output,
        })
    }
}

impl fmt::Debug for OutputGuardrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputGuardrail")
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputGuardrailResult {
    pub guardrail: String,
    pub output: GuardrailFunctionOutput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputGuardrailResult {
    pub guardrail: String,
    pub agent_name: String,
    pub agent_output: serde_json::Value,
    pub output: GuardrailFunctionOutput,
}

enum Evaluation<R> {
    Passed(Vec<R>),
    Tripped(R),
}

/// Run `units` concurrently; stop at the first result that trips.
///
/// On a trip, an error or cancellation of `cancel` the rest of the scope is
/// cancelled and drained. Passed results are returned in completion order.
async fn evaluate<R, P>(
    units: Vec<BoxFuture<'static, Result<R>>>,
    tripped: P,
    cancel: &CancellationToken,
) -> Result<Evaluation<R>>
where
    R: Send + 'static,
    P: Fn(&R) -> bool,
{
    let mut scope = TurnScope::with_parent(cancel);
    for unit in units {
        scope.spawn(unit);
    }

    let mut passed = Vec::new();
    loop {
        let joined = tokio::select! {
            joined = scope.next() => joined,
            _ = cancel.cancelled() => {
                let suppressed = scope.cancel_and_drain().await;
                tracing::debug!(count = suppressed.len(), "Run cancelled while guardrails were running");
                return Err(BatonError::Canceled);
            }
        };
        let Some(joined) = joined else {
            break;
        };
        let outcome = joined.and_then(|(_, outcome)| outcome);
        let stop = match &outcome {
            Ok(result) => tripped(result),
            Err(_) => true,
        };
        if stop {
            let suppressed = scope.cancel_and_drain().await;
            if !suppressed.is_empty() {
                tracing::debug!(
                    count = suppressed.len(),
                    "Suppressed errors from cancelled guardrails"
                );
            }
            return outcome.map(Evaluation::Tripped);
        }
        if let Ok(result) = outcome {
            passed.push(result);
        }
    }
    Ok(Evaluation::Passed(passed))
}

pub(crate) async fn run_input_guardrails(
    guardrails: &[InputGuardrail],
    ctx: &RunContext,
    agent: &Arc<Agent>,
    input: &[ResponseItem],
    tracer: &Tracer,
    cancel: &CancellationToken,
) -> Result<Vec<InputGuardrailResult>> {
    if guardrails.is_empty() {
        return Ok(Vec::new());
    }

    let units = guardrails
        .iter()
        .cloned()
        .map(|guardrail| {
            let (ctx, agent, input) = (ctx.clone(), agent.clone(), input.to_vec());
            let tracer = tracer.clone();
            Box::pin(async move {
                let result = guardrail.run(ctx, agent, input).await?;
                tracer.emit(TraceEvent::GuardrailEvaluated {
                    kind: GuardrailKind::Input,
                    name: result.guardrail.clone(),
                    triggered: result.output.tripwire_triggered,
                });
                Ok(result)
            }) as BoxFuture<'static, Result<InputGuardrailResult>>
        })
        .collect();

    let tripped = |result: &InputGuardrailResult| result.output.tripwire_triggered;
    match evaluate(units, tripped, cancel).await? {
        Evaluation::Passed(results) => Ok(results),
        Evaluation::Tripped(result) => {
            tracing::info!(guardrail = %result.guardrail, "Input guardrail tripwire triggered");
            Err(BatonError::InputGuardrailTripwire {
                guardrail: result.guardrail,
                output_info: result.output.output_info,
            })
        }
    }
}

pub(crate) async fn run_output_guardrails(
    guardrails: &[OutputGuardrail],
    ctx: &RunContext,
    agent: &Arc<Agent>,
    output: &serde_json::Value,
    tracer: &Tracer,
    cancel: &CancellationToken,
) -> Result<Vec<OutputGuardrailResult>> {
    if guardrails.is_empty() {
        return Ok(Vec::new());
    }

    let units = guardrails
        .iter()
        .cloned()
        .map(|guardrail| {
            let (ctx, agent, output) = (ctx.clone(), agent.clone(), output.clone());
            let tracer = tracer.clone();
            Box::pin(async move {
                let result = guardrail.run(ctx, agent, output).await?;
                tracer.emit(TraceEvent::GuardrailEvaluated {
                    kind: GuardrailKind::Output,
                    name: result.guardrail.clone(),
                    triggered: result.output.tripwire_triggered,
                });
                Ok(result)
            }) as BoxFuture<'static, Result<OutputGuardrailResult>>
        })
        .collect();

    let tripped = |result: &OutputGuardrailResult| result.output.tripwire_triggered;
    match evaluate(units, tripped, cancel).await? {
        Evaluation::Passed(results) => Ok(results),
        Evaluation::Tripped(result) => {
            tracing::info!(guardrail = %result.guardrail, "Output guardrail tripwire triggered");
            Err(BatonError::OutputGuardrailTripwire {
                guardrail: result.guardrail,
                output_info: result.output.output_info,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn agent() -> Arc<Agent> {
        Arc::new(Agent::new("assistant"))
    }

    #[tokio::test(start_paused = true)]
    async fn first_tripwire_cancels_slower_guardrails() {
        let slow_finished = Arc::new(AtomicBool::new(false));
        let flag = slow_finished.clone();
        let guardrails = vec![
            InputGuardrail::new("slow", move |_, _, _| {
                let flag = flag.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(GuardrailFunctionOutput::passed(json!(null)))
                }
            }),
            InputGuardrail::new("math_homework", |_, _, _| async {
                Ok(GuardrailFunctionOutput::tripwire(json!({"is_math": true})))
            }),
        ];

        let err = run_input_guardrails(
            &guardrails,
            &RunContext::new(),
            &agent(),
            &[ResponseItem::Message(crate::types::ModelMessage::user("2+2?"))],
            &Tracer::disabled(),
            &CancellationToken::new(),
        )
        .await
        .expect_err("tripwire should abort");

        assert!(matches!(
            err,
            BatonError::InputGuardrailTripwire { ref guardrail, ref output_info }
                if guardrail == "math_homework" && output_info["is_math"] == true
        ));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!slow_finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn passing_output_guardrails_report_their_results() {
        let guardrails = vec![OutputGuardrail::new("length", |_, _, output| async move {
            let len = output.as_str().map(str::len).unwrap_or_default();
            Ok(GuardrailFunctionOutput::passed(json!({"len": len})))
        })];

        let results = run_output_guardrails(
            &guardrails,
            &RunContext::new(),
            &agent(),
            &json!("hello"),
            &Tracer::disabled(),
            &CancellationToken::new(),
        )
        .await
        .expect("guardrail should pass");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].agent_name, "assistant");
        assert_eq!(results[0].output.output_info, json!({"len": 5}));
    }

    #[tokio::test]
    async fn guardrail_errors_propagate() {
        let guardrails = vec![OutputGuardrail::new("broken", |_, _, _| async {
            Err(BatonError::user("guardrail misconfigured"))
        })];

        let err = run_output_guardrails(
            &guardrails,
            &RunContext::new(),
            &agent(),
            &json!("x"),
            &Tracer::disabled(),
            &CancellationToken::new(),
        )
        .await
        .expect_err("error should propagate");

        assert!(matches!(err, BatonError::User(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_the_run_stops_running_guardrails() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let guardrails = vec![InputGuardrail::new("slow", move |_, _, _| {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(300)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(GuardrailFunctionOutput::passed(json!(null)))
            }
        })];
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        let err = run_input_guardrails(
            &guardrails,
            &RunContext::new(),
            &agent(),
            &[],
            &Tracer::disabled(),
            &cancel,
        )
        .await
        .expect_err("cancellation should abort the guardrails");

        assert!(matches!(err, BatonError::Canceled));
        assert!(start.elapsed() < Duration::from_secs(300));
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
