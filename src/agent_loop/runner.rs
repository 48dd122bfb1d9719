//! The run loop: drives an agent through turns until it produces a final
//! output, pauses for approvals, or fails.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::events::{RunEvent, RunEventEmitter, RunId, StreamEvent};
use super::execution::{execute_tools_and_side_effects, ExecutionEnv};
use super::hooks::{NoopHooks, RunHooks};
use super::items::RunItem;
use super::state::RunState;
use super::turn::process_model_response;
use super::types::{
    NextStep, ProcessedResponse, RunErrorDetails, RunInput, RunResult, RunStatus, SingleStepResult,
};
use crate::agent::{Agent, Handoff};
use crate::config::{CallModelData, ModelInputData, RunConfig};
use crate::context::RunContext;
use crate::error::{BatonError, Result};
use crate::guardrail::{
    run_input_guardrails, run_output_guardrails, InputGuardrail, OutputDebouncer, OutputGuardrail,
};
use crate::provider::{ModelProvider, ModelRequest};
use crate::session::Session;
use crate::tools::registry::ToolKindRegistry;
use crate::tools::tool::Tool;
use crate::trace::{TraceEvent, TraceSink, Tracer};
use crate::types::items::{ModelResponse, ResponseItem};
use crate::types::settings::{ModelTracing, ToolChoice};
use crate::types::stream::{ResponseAccumulator, ResponseStreamEvent};
use crate::util::rate_limit::RateLimiter;

/// Per-run options.
#[derive(Clone, Default)]
pub struct RunOptions {
    pub context: RunContext,
    /// Conversation history loaded before, and updated after, every turn.
    pub session: Option<Arc<dyn Session>>,
    /// Replaces the runner's config for this run.
    pub config: Option<RunConfig>,
    /// Chain onto a server-side response; only new items are sent.
    pub previous_response_id: Option<String>,
    pub hooks: Option<Arc<dyn RunHooks>>,
}

impl RunOptions {
    pub fn with_context(mut self, context: RunContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_session(mut self, session: impl Session + 'static) -> Self {
        self.session = Some(Arc::new(session));
        self
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_previous_response_id(mut self, response_id: impl Into<String>) -> Self {
        self.previous_response_id = Some(response_id.into());
        self
    }

    pub fn with_hooks(mut self, hooks: impl RunHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("context", &self.context)
            .field("session", &self.session.as_ref().map(|s| s.session_id().to_string()))
            .field("config", &self.config)
            .field("previous_response_id", &self.previous_response_id)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

/// Runs agents against one model provider.
///
/// Cheap to clone; clones share the rate limiter.
#[derive(Clone)]
pub struct Runner {
    provider: Arc<dyn ModelProvider>,
    config: RunConfig,
    trace_sink: Option<Arc<dyn TraceSink>>,
    rate_limiter: Arc<RateLimiter>,
    tool_registry: ToolKindRegistry,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .field("tracing", &self.trace_sink.is_some())
            .finish_non_exhaustive()
    }
}

impl Runner {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        let config = RunConfig::default();
        Self {
            provider,
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            config,
            trace_sink: None,
            tool_registry: ToolKindRegistry::default(),
        }
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        self.config = config;
        self
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    pub fn with_tool_registry(mut self, registry: ToolKindRegistry) -> Self {
        self.tool_registry = registry;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    /// Run `agent` on `input` with default options.
    pub async fn run(&self, agent: Arc<Agent>, input: impl Into<RunInput>) -> Result<RunResult> {
        self.run_with(agent, input, RunOptions::default()).await
    }

    pub async fn run_with(
        &self,
        agent: Arc<Agent>,
        input: impl Into<RunInput>,
        options: RunOptions,
    ) -> Result<RunResult> {
        let (run, context) = self.prepare(options, RunEventEmitter::detached(), CancellationToken::new());
        run.start(agent, input.into(), context).await
    }

    /// Continue a suspended run after its interruptions were decided.
    ///
    /// The state carries its own context. A caller value attached to
    /// `options.context` replaces the state's, which is how a value lost to
    /// serialization comes back; see also [`RunState::with_context_value`].
    pub async fn resume(&self, state: RunState, options: RunOptions) -> Result<RunResult> {
        let (run, context) = self.prepare(options, RunEventEmitter::detached(), CancellationToken::new());
        run.resume(state, context).await
    }

    /// Start a run in the background and stream its events.
    pub fn run_streamed(
        &self,
        agent: Arc<Agent>,
        input: impl Into<RunInput>,
        options: RunOptions,
    ) -> RunResultStreaming {
        let input = input.into();
        self.spawn_streamed(options, move |run, context| run.start(agent, input, context))
    }

    /// [`Runner::resume`], streamed.
    pub fn resume_streamed(&self, state: RunState, options: RunOptions) -> RunResultStreaming {
        self.spawn_streamed(options, move |run, context| run.resume(state, context))
    }

    fn spawn_streamed<F, Fut>(&self, options: RunOptions, drive: F) -> RunResultStreaming
    where
        F: FnOnce(RunLoop, RunContext) -> Fut,
        Fut: std::future::Future<Output = Result<RunResult>> + Send + 'static,
    {
        let run_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let (run, context) = self.prepare(options, RunEventEmitter::new(run_id, tx), cancel.clone());
        let handle = tokio::spawn(drive(run, context));
        RunResultStreaming {
            run_id,
            events: Some(rx),
            cancel,
            handle,
        }
    }

    fn prepare(
        &self,
        options: RunOptions,
        events: RunEventEmitter,
        cancel: CancellationToken,
    ) -> (RunLoop, RunContext) {
        let config = options.config.unwrap_or_else(|| self.config.clone());
        let tracer = if config.tracing_disabled {
            Tracer::disabled()
        } else {
            Tracer::new(self.trace_sink.clone(), config.trace_include_sensitive_data)
        };
        let run = RunLoop {
            provider: self.provider.clone(),
            rate_limiter: self.rate_limiter.clone(),
            tool_registry: self.tool_registry.clone(),
            config,
            session: options.session,
            previous_response_id: options.previous_response_id,
            hooks: options.hooks.unwrap_or_else(|| Arc::new(NoopHooks)),
            tracer,
            events,
            cancel,
        };
        (run, options.context)
    }
}

/// A run executing in the background.
///
/// Dropping the handle does not stop the run; call [`RunResultStreaming::cancel`].
pub struct RunResultStreaming {
    run_id: RunId,
    events: Option<mpsc::UnboundedReceiver<RunEvent>>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<RunResult>>,
}

impl fmt::Debug for RunResultStreaming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunResultStreaming")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RunResultStreaming {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Live events, ending when the run ends. Only the first call gets them.
    pub fn events(&mut self) -> BoxStream<'static, RunEvent> {
        match self.events.take() {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => stream::empty().boxed(),
        }
    }

    /// Stop the run. In-flight tools are cancelled and drained; `wait`
    /// then returns [`BatonError::Canceled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the run to end.
    pub async fn wait(self) -> Result<RunResult> {
        self.handle.await?
    }
}

enum TurnOutcome {
    Continue,
    Finished(serde_json::Value),
    Suspended,
}

/// One run's worth of runner state.
struct RunLoop {
    provider: Arc<dyn ModelProvider>,
    rate_limiter: Arc<RateLimiter>,
    tool_registry: ToolKindRegistry,
    config: RunConfig,
    session: Option<Arc<dyn Session>>,
    previous_response_id: Option<String>,
    hooks: Arc<dyn RunHooks>,
    tracer: Tracer,
    events: RunEventEmitter,
    cancel: CancellationToken,
}

impl RunLoop {
    async fn start(self, agent: Arc<Agent>, input: RunInput, context: RunContext) -> Result<RunResult> {
        let span = tracing::info_span!(
            "agent_run",
            agent = %agent.name(),
            workflow = %self.config.workflow_name,
            trace_id = %self.tracer.trace_id(),
        );
        async move {
            let new_input = input.into_items();
            let original_input = match &self.session {
                Some(session) => {
                    let history = session.get_items(self.config.session_history_limit).await?;
                    match &self.config.session_input_callback {
                        Some(callback) => callback(history, new_input.clone()).await?,
                        None => history.into_iter().chain(new_input.iter().cloned()).collect(),
                    }
                }
                None => new_input.clone(),
            };
            let mut state = RunState::new(context, original_input, agent.clone(), self.config.max_turns);
            state.previous_response_id = self.previous_response_id.clone();

            tracing::info!(max_turns = state.max_turns, "Run started");
            self.tracer.emit(TraceEvent::RunStarted {
                agent: agent.name().to_string(),
                workflow_name: self.config.workflow_name.clone(),
            });
            self.events.emit(StreamEvent::AgentUpdated {
                agent: agent.name().to_string(),
            });

            let outcome = self.run_turns(&mut state, Some(new_input), None).await;
            self.finish(state, outcome)
        }
        .instrument(span)
        .await
    }

    async fn resume(self, mut state: RunState, context: RunContext) -> Result<RunResult> {
        state.context.inherit_value(&context);
        let span = tracing::info_span!(
            "agent_run",
            agent = %state.current_agent.name(),
            workflow = %self.config.workflow_name,
            trace_id = %self.tracer.trace_id(),
        );
        async move {
            if state.status == RunStatus::Completed {
                return Err(BatonError::InvalidState(
                    "Run already completed; start a new run instead".into(),
                ));
            }
            tracing::info!(
                turn = state.current_turn,
                pending = state.interruptions.len(),
                "Resuming run"
            );
            self.tracer.emit(TraceEvent::RunStarted {
                agent: state.current_agent.name().to_string(),
                workflow_name: self.config.workflow_name.clone(),
            });

            let resumed_agent = state.current_agent.clone();
            let outcome = match self.resume_interrupted_turn(&mut state).await {
                Ok(TurnOutcome::Finished(output)) => Ok(Some(output)),
                Ok(TurnOutcome::Suspended) => Ok(None),
                Ok(TurnOutcome::Continue) => {
                    self.run_turns(&mut state, None, Some(resumed_agent)).await
                }
                Err(e) => Err(e),
            };
            self.finish(state, outcome)
        }
        .instrument(span)
        .await
    }

    /// Finish the turn that was interrupted, without counting a new turn.
    ///
    /// Calls that already have outputs are skipped; the rest run against the
    /// decisions now recorded in the context.
    async fn resume_interrupted_turn(&self, state: &mut RunState) -> Result<TurnOutcome> {
        state.status = RunStatus::Running;
        state.interruptions.clear();

        let persisted = state.persisted_item_count.min(state.generated_items.len());
        let placeholders = state.generated_items[..persisted]
            .iter()
            .filter(|item| matches!(item, RunItem::ToolApproval(_)))
            .count();
        state.persisted_item_count = persisted - placeholders;
        state
            .generated_items
            .retain(|item| !matches!(item, RunItem::ToolApproval(_)));

        let (Some(processed), Some(response)) = (
            state.last_processed_response.clone(),
            state.model_responses.last().cloned(),
        ) else {
            return Ok(TurnOutcome::Continue);
        };

        let answered: HashSet<String> = state
            .generated_items
            .iter()
            .filter(|item| item.is_tool_output())
            .filter_map(|item| item.call_id().map(str::to_string))
            .collect();
        let pending = ProcessedResponse {
            new_items: Vec::new(),
            handoffs: processed
                .handoffs
                .into_iter()
                .filter(|call| !answered.contains(&call.id))
                .collect(),
            functions: processed
                .functions
                .into_iter()
                .filter(|call| !answered.contains(&call.id))
                .collect(),
            computer_actions: processed
                .computer_actions
                .into_iter()
                .filter(|call| !answered.contains(&call.call_id))
                .collect(),
            shell_calls: processed
                .shell_calls
                .into_iter()
                .filter(|call| !answered.contains(&call.call_id))
                .collect(),
            apply_patch_calls: processed
                .apply_patch_calls
                .into_iter()
                .filter(|call| !answered.contains(&call.call_id))
                .collect(),
            mcp_calls: Vec::new(),
            tools_used: processed.tools_used,
        };
        if !pending.has_tools_or_approvals_to_run() {
            return Ok(TurnOutcome::Continue);
        }

        let agent = state.current_agent.clone();
        let tools = agent.all_tools(&state.context).await?;
        let handoffs = agent.enabled_handoffs(&state.context);
        let step = execute_tools_and_side_effects(
            &self.env(&agent, &state.context),
            &tools,
            &handoffs,
            state.original_input.clone(),
            state.generated_items.clone(),
            response,
            pending,
        )
        .await?;
        self.apply_step(state, &agent, step).await
    }

    /// Returns the final output, or `None` when the run paused.
    ///
    /// `started` is the agent whose start hook already ran, if any.
    async fn run_turns(
        &self,
        state: &mut RunState,
        new_input: Option<Vec<ResponseItem>>,
        mut started: Option<Arc<Agent>>,
    ) -> Result<Option<serde_json::Value>> {
        if let Some(new_input) = new_input {
            let guardrails: Vec<InputGuardrail> = self
                .config
                .input_guardrails
                .iter()
                .chain(state.current_agent.input_guardrails())
                .cloned()
                .collect();
            state.input_guardrail_results = run_input_guardrails(
                &guardrails,
                &state.context,
                &state.current_agent,
                &state.original_input,
                &self.tracer,
                &self.cancel,
            )
            .await?;

            if let Some(session) = &self.session {
                if !new_input.is_empty() {
                    session.add_items(new_input).await?;
                }
            }
        }

        loop {
            if self.cancel.is_cancelled() {
                return Err(BatonError::Canceled);
            }

            let agent = state.current_agent.clone();
            let tools = agent.all_tools(&state.context).await?;
            let handoffs = agent.enabled_handoffs(&state.context);

            state.current_turn += 1;
            if state.current_turn > state.max_turns {
                tracing::warn!(max_turns = state.max_turns, "Max turns exceeded");
                return Err(BatonError::MaxTurnsExceeded {
                    max_turns: state.max_turns,
                });
            }
            tracing::debug!(turn = state.current_turn, agent = %agent.name(), "Turn started");
            self.tracer.emit(TraceEvent::TurnStarted {
                turn: state.current_turn,
                agent: agent.name().to_string(),
            });

            if !started.as_ref().is_some_and(|seen| Arc::ptr_eq(seen, &agent)) {
                self.hooks.on_agent_start(&state.context, &agent).await;
                started = Some(agent.clone());
            }

            let request = self.build_request(state, &agent, &tools, &handoffs).await?;
            self.hooks
                .on_llm_start(
                    &state.context,
                    &agent,
                    request.system_instructions.as_deref(),
                    &request.input,
                )
                .await;
            let mut response = self.call_model(&agent, &request, &state.context).await?;
            self.hooks.on_llm_end(&state.context, &agent, &response).await;
            if !self.config.track_cost {
                response.usage.cost = None;
            }
            state.context.usage().record(&response.usage);
            if state.previous_response_id.is_some() {
                if let Some(id) = &response.response_id {
                    state.previous_response_id = Some(id.clone());
                }
            }
            state.model_responses.push(response.clone());

            let processed = process_model_response(&agent, &tools, &handoffs, &response)?;
            state.last_processed_response = Some(processed.clone());
            let step = execute_tools_and_side_effects(
                &self.env(&agent, &state.context),
                &tools,
                &handoffs,
                state.original_input.clone(),
                state.generated_items.clone(),
                response,
                processed,
            )
            .await?;

            match self.apply_step(state, &agent, step).await? {
                TurnOutcome::Continue => {}
                TurnOutcome::Finished(output) => return Ok(Some(output)),
                TurnOutcome::Suspended => return Ok(None),
            }
        }
    }

    /// Merge a turn's result into the state and act on its next step.
    async fn apply_step(
        &self,
        state: &mut RunState,
        agent: &Arc<Agent>,
        step: SingleStepResult,
    ) -> Result<TurnOutcome> {
        self.events.emit_items(&step.new_step_items);
        state.original_input = step.original_input;
        state.generated_items = step.pre_step_items;
        state.generated_items.extend(step.new_step_items);
        state.tool_guardrail_results.extend(step.tool_guardrail_results);
        self.tracer.emit(TraceEvent::TurnEnded {
            turn: state.current_turn,
            agent: agent.name().to_string(),
        });
        self.save_session(state).await?;

        match step.next_step {
            NextStep::RunAgain => Ok(TurnOutcome::Continue),
            NextStep::Handoff(target) => {
                self.hooks.on_handoff(&state.context, agent, &target).await;
                self.events.emit(StreamEvent::AgentUpdated {
                    agent: target.name().to_string(),
                });
                state.current_agent = target;
                Ok(TurnOutcome::Continue)
            }
            NextStep::Interruption(items) => {
                tracing::info!(pending = items.len(), turn = state.current_turn, "Run suspended");
                state.interruptions = items;
                state.status = RunStatus::Suspended;
                Ok(TurnOutcome::Suspended)
            }
            NextStep::FinalOutput(output) => {
                let guardrails = self.output_guardrails(agent);
                state.output_guardrail_results = run_output_guardrails(
                    &guardrails,
                    &state.context,
                    agent,
                    &output,
                    &self.tracer,
                    &self.cancel,
                )
                .await?;
                state.status = RunStatus::Completed;
                self.hooks.on_agent_end(&state.context, agent, &output).await;
                tracing::info!(turns = state.current_turn, agent = %agent.name(), "Run completed");
                Ok(TurnOutcome::Finished(output))
            }
        }
    }

    fn output_guardrails(&self, agent: &Agent) -> Vec<OutputGuardrail> {
        self.config
            .output_guardrails
            .iter()
            .chain(agent.output_guardrails())
            .cloned()
            .collect()
    }

    fn env(&self, agent: &Arc<Agent>, context: &RunContext) -> Arc<ExecutionEnv> {
        Arc::new(ExecutionEnv {
            agent: agent.clone(),
            ctx: context.clone(),
            config: self.config.clone(),
            tracer: self.tracer.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
            hooks: self.hooks.clone(),
        })
    }

    async fn build_request(
        &self,
        state: &RunState,
        agent: &Arc<Agent>,
        tools: &[Arc<dyn Tool>],
        handoffs: &[Handoff],
    ) -> Result<ModelRequest> {
        let mut settings = agent
            .model_settings()
            .resolve(self.config.model_settings.as_ref());
        let forced = matches!(
            settings.tool_choice,
            Some(ToolChoice::Required | ToolChoice::Function { .. })
        );
        if forced && agent.reset_tool_choice() && used_tools(state, agent.name()) {
            tracing::debug!(agent = %agent.name(), "Resetting tool choice after tool use");
            settings.tool_choice = None;
        }

        let mut model_data = ModelInputData {
            input: model_input(state),
            instructions: agent.system_prompt(&state.context).await?,
        };
        if let Some(filter) = &self.config.call_model_input_filter {
            model_data = filter(CallModelData {
                model_data,
                agent: agent.clone(),
                context: state.context.clone(),
            })
            .await
            .map_err(|e| BatonError::user(format!("Error in call_model_input_filter: {e}")))?;
        }

        Ok(ModelRequest {
            model: self
                .config
                .model
                .clone()
                .or_else(|| agent.model().map(str::to_string)),
            system_instructions: model_data.instructions,
            input: model_data.input,
            tools: tools
                .iter()
                .map(|tool| tool.spec())
                .chain(agent.builtin_tool_specs())
                .collect(),
            handoffs: handoffs.iter().map(Handoff::spec).collect(),
            output_schema: agent.output_schema().cloned(),
            settings,
            tracing: ModelTracing::from_flags(
                self.config.tracing_disabled,
                self.config.trace_include_sensitive_data,
            ),
            previous_response_id: state.previous_response_id.clone(),
            tool_kinds: self.tool_registry.clone(),
        })
    }

    async fn call_model(
        &self,
        agent: &Arc<Agent>,
        request: &ModelRequest,
        ctx: &RunContext,
    ) -> Result<ModelResponse> {
        if self.events.is_attached() {
            let attempts = AtomicU32::new(0);
            self.rate_limiter
                .execute_with_retry(|| {
                    let attempt = attempts.fetch_add(1, Ordering::Relaxed);
                    if attempt > 0 {
                        self.events.emit(StreamEvent::StreamRestarted { attempt });
                    }
                    self.stream_model(agent, request, ctx)
                })
                .await
        } else {
            self.rate_limiter
                .execute_with_retry(|| self.provider.get_response(request))
                .await
        }
    }

    /// Forward provider events as they arrive and fold them into a response.
    ///
    /// Output guardrails run over the live text whenever enough new text has
    /// arrived since they last ran.
    async fn stream_model(
        &self,
        agent: &Arc<Agent>,
        request: &ModelRequest,
        ctx: &RunContext,
    ) -> Result<ModelResponse> {
        let live_guardrails = match agent.output_schema() {
            Some(_) => Vec::new(),
            None => self.output_guardrails(agent),
        };
        let mut debouncer = OutputDebouncer::new(self.config.guardrail_debounce_chars);
        let mut text = String::new();
        let mut text_chars = 0;

        let mut events = self.provider.stream_response(request).await?;
        let mut accumulator = ResponseAccumulator::new();
        loop {
            let event = tokio::select! {
                event = events.next() => event,
                _ = self.cancel.cancelled() => return Err(BatonError::Canceled),
            };
            let Some(event) = event else {
                break;
            };
            let event = event?;
            accumulator.push(&event);
            if let ResponseStreamEvent::TextDelta { delta } = &event {
                text.push_str(delta);
                text_chars += delta.chars().count();
            }
            self.events.emit(StreamEvent::RawResponse { event });

            if !live_guardrails.is_empty() && debouncer.observe(text_chars) {
                tracing::debug!(chars = text_chars, "Checking streamed output");
                run_output_guardrails(
                    &live_guardrails,
                    ctx,
                    agent,
                    &serde_json::Value::String(text.clone()),
                    &self.tracer,
                    &self.cancel,
                )
                .await?;
            }
        }
        accumulator.finish()
    }

    async fn save_session(&self, state: &mut RunState) -> Result<()> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        let items: Vec<ResponseItem> = state
            .generated_items
            .get(state.persisted_item_count..)
            .unwrap_or_default()
            .iter()
            .filter_map(RunItem::to_input_item)
            .collect();
        if !items.is_empty() {
            session.add_items(items).await?;
        }
        state.persisted_item_count = state.generated_items.len();
        Ok(())
    }

    fn finish(&self, mut state: RunState, outcome: Result<Option<serde_json::Value>>) -> Result<RunResult> {
        match outcome {
            Ok(final_output) => {
                self.tracer.emit(TraceEvent::RunEnded {
                    agent: state.current_agent.name().to_string(),
                    error: None,
                });
                Ok(into_result(state, final_output))
            }
            Err(e) => {
                state.status = RunStatus::Failed;
                tracing::warn!(error = %e, turn = state.current_turn, "Run failed");
                self.tracer.emit(TraceEvent::RunEnded {
                    agent: state.current_agent.name().to_string(),
                    error: Some(e.to_string()),
                });
                Err(e.with_run_details(RunErrorDetails {
                    input: state.original_input,
                    new_items: state.generated_items,
                    raw_responses: state.model_responses,
                    last_agent: state.current_agent.name().to_string(),
                    input_guardrail_results: state.input_guardrail_results,
                    output_guardrail_results: state.output_guardrail_results,
                }))
            }
        }
    }
}

fn into_result(state: RunState, final_output: Option<serde_json::Value>) -> RunResult {
    RunResult {
        input: state.original_input.clone(),
        new_items: state.generated_items.clone(),
        raw_responses: state.model_responses.clone(),
        final_output,
        last_agent: state.current_agent.clone(),
        interruptions: state.interruptions.clone(),
        input_guardrail_results: state.input_guardrail_results.clone(),
        output_guardrail_results: state.output_guardrail_results.clone(),
        tool_guardrail_results: state.tool_guardrail_results.clone(),
        usage: state.usage(),
        status: state.status,
        state,
    }
}

/// Whether `agent` called a tool earlier in this run.
fn used_tools(state: &RunState, agent: &str) -> bool {
    state
        .generated_items
        .iter()
        .any(|item| matches!(item, RunItem::ToolCall { agent: by, .. } if by == agent))
}

/// Input for the next model call.
///
/// When chaining onto a previous response, the provider already holds
/// everything up to its last output, so only the tool outputs since then are
/// sent.
fn model_input(state: &RunState) -> Vec<ResponseItem> {
    if state.previous_response_id.is_none() || state.model_responses.is_empty() {
        return state.input_with_generated();
    }
    let mut trailing: Vec<ResponseItem> = state
        .generated_items
        .iter()
        .rev()
        .take_while(|item| item.is_tool_output())
        .filter_map(RunItem::to_input_item)
        .collect();
    trailing.reverse();
    trailing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemorySession;
    use crate::tools::tool::AgentTool;
    use crate::tools::types::AgentToolParameters;
    use crate::types::message::{AgentToolCall, ModelMessage};
    use crate::types::settings::ModelSettings;
    use crate::types::usage::Usage;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records every request.
    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<ModelResponse>>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<ModelResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ModelRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn get_response(&self, request: &ModelRequest) -> Result<ModelResponse> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| BatonError::Provider {
                    provider: "scripted".into(),
                    message: "script exhausted".into(),
                })
        }
    }

    fn text(text: &str) -> ModelResponse {
        ModelResponse::new(
            vec![ResponseItem::Message(ModelMessage::assistant(text))],
            Usage::single(10, 5),
        )
    }

    fn tool_call(id: &str, name: &str) -> ModelResponse {
        ModelResponse::new(
            vec![ResponseItem::FunctionCall(AgentToolCall::new(id, name, json!({})))],
            Usage::single(20, 2),
        )
    }

    fn clock() -> AgentTool {
        AgentTool::new("clock", "current time", AgentToolParameters::empty(), |_, _| async {
            Ok(json!("12:00"))
        })
    }

    #[tokio::test]
    async fn text_reply_completes_the_run() {
        let provider = Scripted::new(vec![text("hello there")]);
        let agent = Arc::new(Agent::new("greeter").with_instructions("Be kind."));

        let result = Runner::new(provider.clone())
            .run(agent, "hi")
            .await
            .expect("run should complete");

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.final_output, Some(json!("hello there")));
        assert_eq!(result.usage.requests, 1);
        let requests = provider.requests();
        assert_eq!(requests[0].system_instructions.as_deref(), Some("Be kind."));
        assert_eq!(requests[0].input.len(), 1);
    }

    #[tokio::test]
    async fn tool_outputs_feed_the_next_turn() {
        let provider = Scripted::new(vec![tool_call("c1", "clock"), text("It is noon.")]);
        let agent = Arc::new(Agent::new("timekeeper").with_tool(clock()));

        let result = Runner::new(provider.clone())
            .run(agent, "what time is it?")
            .await
            .expect("run should complete");

        assert_eq!(result.final_output, Some(json!("It is noon.")));
        assert_eq!(result.raw_responses.len(), 2);
        let second = &provider.requests()[1];
        assert_eq!(second.input.len(), 3);
        assert!(matches!(
            &second.input[2],
            ResponseItem::FunctionCallOutput(output) if output.tool_call_id == "c1"
        ));
        assert_eq!(result.usage.input_tokens, 30);
    }

    #[tokio::test]
    async fn exceeding_max_turns_fails_with_details() {
        let provider = Scripted::new(vec![tool_call("c1", "clock"), tool_call("c2", "clock")]);
        let agent = Arc::new(Agent::new("looper").with_tool(clock()));

        let err = Runner::new(provider)
            .with_config(RunConfig::default().with_max_turns(1))
            .run(agent, "loop")
            .await
            .expect_err("second turn should exceed the limit");

        assert!(matches!(err.root(), BatonError::MaxTurnsExceeded { max_turns: 1 }));
        let details = err.run_details().expect("run failures should carry details");
        assert_eq!(details.last_agent, "looper");
        assert_eq!(details.raw_responses.len(), 1);
        assert_eq!(details.new_items.len(), 2);
    }

    #[tokio::test]
    async fn forced_tool_choice_resets_after_use() {
        let provider = Scripted::new(vec![tool_call("c1", "clock"), text("noon")]);
        let agent = Arc::new(
            Agent::new("timekeeper")
                .with_tool(clock())
                .with_model_settings(ModelSettings {
                    tool_choice: Some(ToolChoice::Required),
                    ..Default::default()
                }),
        );

        Runner::new(provider.clone())
            .run(agent, "time?")
            .await
            .expect("run should complete");

        let requests = provider.requests();
        assert_eq!(requests[0].settings.tool_choice, Some(ToolChoice::Required));
        assert_eq!(requests[1].settings.tool_choice, None);
    }

    #[tokio::test]
    async fn chained_runs_send_only_new_tool_outputs() {
        let provider = Scripted::new(vec![
            tool_call("c1", "clock").with_response_id("resp_1"),
            text("noon").with_response_id("resp_2"),
        ]);
        let agent = Arc::new(Agent::new("timekeeper").with_tool(clock()));

        let result = Runner::new(provider.clone())
            .run_with(
                agent,
                "time?",
                RunOptions::default().with_previous_response_id("resp_0"),
            )
            .await
            .expect("run should complete");

        let requests = provider.requests();
        assert_eq!(requests[0].previous_response_id.as_deref(), Some("resp_0"));
        assert_eq!(requests[0].input.len(), 1);
        assert_eq!(requests[1].previous_response_id.as_deref(), Some("resp_1"));
        assert_eq!(requests[1].input.len(), 1);
        assert_eq!(result.state.previous_response_id(), Some("resp_2"));
    }

    #[tokio::test]
    async fn session_receives_input_and_outputs_once() {
        let provider = Scripted::new(vec![tool_call("c1", "clock"), text("noon")]);
        let agent = Arc::new(Agent::new("timekeeper").with_tool(clock()));
        let session = InMemorySession::new("s1");

        Runner::new(provider)
            .run_with(agent, "time?", RunOptions::default().with_session(session.clone()))
            .await
            .expect("run should complete");

        let history = session.get_items(None).await.expect("history should load");
        let kinds: Vec<&str> = history.iter().map(ResponseItem::kind).collect();
        assert_eq!(kinds, vec!["message", "function_call", "function_call_output", "message"]);
    }

    #[tokio::test]
    async fn streamed_run_ends_its_event_stream() {
        let provider = Scripted::new(vec![text("streamed")]);
        let agent = Arc::new(Agent::new("narrator"));

        let mut streamed = Runner::new(provider).run_streamed(agent, "go", RunOptions::default());
        let events: Vec<RunEvent> = streamed.events().collect().await;
        let result = streamed.wait().await.expect("run should complete");

        assert_eq!(result.final_output, Some(json!("streamed")));
        assert!(matches!(events[0].payload, StreamEvent::AgentUpdated { .. }));
        assert!(events
            .iter()
            .any(|event| matches!(event.payload, StreamEvent::RawResponse { .. })));
        assert!(events.windows(2).all(|pair| pair[0].seq < pair[1].seq));
    }

    #[tokio::test]
    async fn cancelled_stream_reports_canceled() {
        let provider = Scripted::new(vec![text("never")]);
        let agent = Arc::new(Agent::new("narrator"));

        let streamed = Runner::new(provider).run_streamed(agent, "go", RunOptions::default());
        streamed.cancel();
        let err = streamed.wait().await.expect_err("cancelled run should fail");

        assert!(matches!(err.root(), BatonError::Canceled));
    }
}
