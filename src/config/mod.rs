//! Run-level configuration (layered: code > env > file).

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;

use crate::agent::handoff::{HandoffInputData, HandoffInputFilter};
use crate::agent::Agent;
use crate::context::RunContext;
use crate::error::{BatonError, Result};
use crate::guardrail::{InputGuardrail, OutputGuardrail};
use crate::types::items::ResponseItem;
use crate::types::settings::ModelSettings;
use crate::util::rate_limit::RateLimitConfig;

pub const DEFAULT_MAX_TURNS: usize = 10;
pub const DEFAULT_GUARDRAIL_DEBOUNCE_CHARS: usize = 100;
pub const DEFAULT_WORKFLOW_NAME: &str = "Agent workflow";

/// Turns a tool handler failure into the text the model sees.
pub type ToolErrorFormatter = Arc<dyn Fn(&str, &BatonError) -> String + Send + Sync>;

/// The instructions and input of one model call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInputData {
    pub input: Vec<ResponseItem>,
    pub instructions: Option<String>,
}

/// What a [`CallModelInputFilter`] receives.
#[derive(Debug, Clone)]
pub struct CallModelData {
    pub model_data: ModelInputData,
    pub agent: Arc<Agent>,
    pub context: RunContext,
}

/// Rewrites the model input right before each model call.
pub type CallModelInputFilter =
    Arc<dyn Fn(CallModelData) -> BoxFuture<'static, Result<ModelInputData>> + Send + Sync>;

/// Combines session history (first) with new input (second) into the run input.
pub type SessionInputCallback = Arc<
    dyn Fn(Vec<ResponseItem>, Vec<ResponseItem>) -> BoxFuture<'static, Result<Vec<ResponseItem>>>
        + Send
        + Sync,
>;

/// Settings that apply to a whole run, across agents.
#[derive(Clone)]
pub struct RunConfig {
    /// Overrides every agent's model.
    pub model: Option<String>,
    /// Overlaid on each agent's settings.
    pub model_settings: Option<ModelSettings>,
    pub max_turns: usize,
    /// Keep provider-reported cost in usage totals.
    pub track_cost: bool,
    pub tool_error_formatter: Option<ToolErrorFormatter>,
    /// New streamed text needed before output guardrails re-run.
    pub guardrail_debounce_chars: usize,
    /// How many session items are loaded ahead of new input.
    pub session_history_limit: Option<usize>,
    /// Applied to handoffs that carry no filter of their own.
    pub handoff_input_filter: Option<HandoffInputFilter>,
    pub call_model_input_filter: Option<CallModelInputFilter>,
    /// Replaces the default history-then-input merge when a session is used.
    pub session_input_callback: Option<SessionInputCallback>,
    pub input_guardrails: Vec<InputGuardrail>,
    pub output_guardrails: Vec<OutputGuardrail>,
    pub tracing_disabled: bool,
    pub trace_include_sensitive_data: bool,
    pub workflow_name: String,
    pub rate_limit: RateLimitConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: None,
            model_settings: None,
            max_turns: DEFAULT_MAX_TURNS,
            track_cost: false,
            tool_error_formatter: None,
            guardrail_debounce_chars: DEFAULT_GUARDRAIL_DEBOUNCE_CHARS,
            session_history_limit: None,
            handoff_input_filter: None,
            call_model_input_filter: None,
            session_input_callback: None,
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            tracing_disabled: false,
            trace_include_sensitive_data: true,
            workflow_name: DEFAULT_WORKFLOW_NAME.to_string(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("model", &self.model)
            .field("max_turns", &self.max_turns)
            .field("track_cost", &self.track_cost)
            .field("guardrail_debounce_chars", &self.guardrail_debounce_chars)
            .field("session_history_limit", &self.session_history_limit)
            .field("call_model_input_filter", &self.call_model_input_filter.is_some())
            .field("session_input_callback", &self.session_input_callback.is_some())
            .field("input_guardrails", &self.input_guardrails.len())
            .field("output_guardrails", &self.output_guardrails.len())
            .field("tracing_disabled", &self.tracing_disabled)
            .field("workflow_name", &self.workflow_name)
            .field("rate_limit", &self.rate_limit)
            .finish_non_exhaustive()
    }
}

/// The file/env representable subset of [`RunConfig`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RunConfigFile {
    model: Option<String>,
    model_settings: Option<ModelSettings>,
    max_turns: Option<usize>,
    track_cost: Option<bool>,
    guardrail_debounce_chars: Option<usize>,
    session_history_limit: Option<usize>,
    tracing_disabled: Option<bool>,
    trace_include_sensitive_data: Option<bool>,
    workflow_name: Option<String>,
    rate_limit: Option<RateLimitConfig>,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `BATON_*` environment variables.
    ///
    /// A `.env` file is loaded first when present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Some(model) = env_var("BATON_MODEL") {
            config.model = Some(model);
        }
        if let Some(max_turns) = parse_env("BATON_MAX_TURNS")? {
            config.max_turns = max_turns;
        }
        if let Some(track_cost) = parse_env("BATON_TRACK_COST")? {
            config.track_cost = track_cost;
        }
        if let Some(disabled) = parse_env("BATON_TRACING_DISABLED")? {
            config.tracing_disabled = disabled;
        }
        if let Some(rpm) = parse_env("BATON_REQUESTS_PER_MINUTE")? {
            config.rate_limit.requests_per_minute = Some(rpm);
        }
        if let Some(chars) = parse_env("BATON_GUARDRAIL_DEBOUNCE_CHARS")? {
            config.guardrail_debounce_chars = chars;
        }

        Ok(config)
    }

    /// Parse a TOML document. Unset keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: RunConfigFile = toml::from_str(text)
            .map_err(|e| BatonError::Configuration(format!("Invalid run config: {e}")))?;

        if let Some(rate_limit) = &file.rate_limit {
            rate_limit.validate()?;
        }

        let defaults = Self::default();
        Ok(Self {
            model: file.model,
            model_settings: file.model_settings,
            max_turns: file.max_turns.unwrap_or(defaults.max_turns),
            track_cost: file.track_cost.unwrap_or(defaults.track_cost),
            guardrail_debounce_chars: file
                .guardrail_debounce_chars
                .unwrap_or(defaults.guardrail_debounce_chars),
            session_history_limit: file.session_history_limit,
            tracing_disabled: file.tracing_disabled.unwrap_or(defaults.tracing_disabled),
            trace_include_sensitive_data: file
                .trace_include_sensitive_data
                .unwrap_or(defaults.trace_include_sensitive_data),
            workflow_name: file.workflow_name.unwrap_or(defaults.workflow_name),
            rate_limit: file.rate_limit.unwrap_or(defaults.rate_limit),
            ..defaults
        })
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = Some(settings);
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_track_cost(mut self, track_cost: bool) -> Self {
        self.track_cost = track_cost;
        self
    }

    pub fn with_tool_error_formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&str, &BatonError) -> String + Send + Sync + 'static,
    {
        self.tool_error_formatter = Some(Arc::new(formatter));
        self
    }

    pub fn with_guardrail_debounce_chars(mut self, chars: usize) -> Self {
        self.guardrail_debounce_chars = chars;
        self
    }

    pub fn with_session_history_limit(mut self, limit: usize) -> Self {
        self.session_history_limit = Some(limit);
        self
    }

    pub fn with_handoff_input_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(HandoffInputData) -> HandoffInputData + Send + Sync + 'static,
    {
        self.handoff_input_filter = Some(Arc::new(filter));
        self
    }

    pub fn with_call_model_input_filter<F, Fut>(mut self, filter: F) -> Self
    where
        F: Fn(CallModelData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ModelInputData>> + Send + 'static,
    {
        self.call_model_input_filter = Some(Arc::new(move |data| Box::pin(filter(data))));
        self
    }

    pub fn with_session_input_callback<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(Vec<ResponseItem>, Vec<ResponseItem>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<ResponseItem>>> + Send + 'static,
    {
        self.session_input_callback =
            Some(Arc::new(move |history, new_input| Box::pin(callback(history, new_input))));
        self
    }

    pub fn with_input_guardrail(mut self, guardrail: InputGuardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: OutputGuardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    pub fn with_tracing_disabled(mut self, disabled: bool) -> Self {
        self.tracing_disabled = disabled;
        self
    }

    pub fn with_trace_include_sensitive_data(mut self, include: bool) -> Self {
        self.trace_include_sensitive_data = include;
        self
    }

    pub fn with_workflow_name(mut self, name: impl Into<String>) -> Self {
        self.workflow_name = name.into();
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Text fed back to the model when a tool handler fails.
    pub fn format_tool_error(&self, tool_name: &str, error: &BatonError) -> String {
        match &self.tool_error_formatter {
            Some(formatter) => formatter(tool_name, error),
            None => format!(
                "An error occurred while running the tool. Please try again. Error: {error}"
            ),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    env_var(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| BatonError::Configuration(format!("{key}={raw}: {e}")))
        })
        .transpose()
}
