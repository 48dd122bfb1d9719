//! Error types for baton.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

use crate::agent_loop::types::RunErrorDetails;

/// Failures raised by a [`Session`](crate::session::Session) backend.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session '{session_id}' not found")]
    NotFound { session_id: String },

    #[error("Session '{session_id}': serialization error: {message}")]
    Serialization { session_id: String, message: String },

    #[error("Session '{session_id}': {message}")]
    Backend { session_id: String, message: String },
}

impl SessionError {
    pub fn session_id(&self) -> &str {
        match self {
            Self::NotFound { session_id }
            | Self::Serialization { session_id, .. }
            | Self::Backend { session_id, .. } => session_id,
        }
    }
}

/// Primary error type for all baton operations.
#[derive(Error, Debug)]
pub enum BatonError {
    /// The caller configured something the engine cannot work with.
    #[error("User error: {0}")]
    User(String),

    /// The model referenced a tool/handoff that does not exist, or produced invalid output.
    #[error("Model behavior error: {0}")]
    ModelBehavior(String),

    #[error("Input guardrail '{guardrail}' triggered tripwire")]
    InputGuardrailTripwire {
        guardrail: String,
        output_info: serde_json::Value,
    },

    #[error("Output guardrail '{guardrail}' triggered tripwire")]
    OutputGuardrailTripwire {
        guardrail: String,
        output_info: serde_json::Value,
    },

    #[error("Tool input guardrail '{guardrail}' triggered tripwire on tool '{tool_name}'")]
    ToolInputGuardrailTripwire {
        guardrail: String,
        tool_name: String,
        output_info: serde_json::Value,
    },

    #[error("Tool output guardrail '{guardrail}' triggered tripwire on tool '{tool_name}'")]
    ToolOutputGuardrailTripwire {
        guardrail: String,
        tool_name: String,
        output_info: serde_json::Value,
    },

    #[error("Max turns ({max_turns}) exceeded")]
    MaxTurnsExceeded { max_turns: usize },

    #[error(transparent)]
    Session(#[from] SessionError),

    /// A tool server failed while serving a call. Converted into tool output by the run loop.
    #[error("Upstream error from server '{server}' calling '{tool}': {message}")]
    McpUpstream {
        server: String,
        tool: String,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Run canceled")]
    Canceled,

    /// A spawned unit of work panicked or was aborted unexpectedly.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// An error escaped the run loop; `details` holds the partial run.
    #[error("{source}")]
    RunFailed {
        source: Box<BatonError>,
        details: Box<RunErrorDetails>,
    },
}

impl BatonError {
    pub fn user(message: impl Into<String>) -> Self {
        Self::User(message.into())
    }

    pub fn model_behavior(message: impl Into<String>) -> Self {
        Self::ModelBehavior(message.into())
    }

    /// Attach partial run data. Already-wrapped errors are returned unchanged.
    pub fn with_run_details(self, details: RunErrorDetails) -> Self {
        match self {
            Self::RunFailed { .. } => self,
            other => Self::RunFailed {
                source: Box::new(other),
                details: Box::new(details),
            },
        }
    }

    /// The underlying error, looking through [`BatonError::RunFailed`].
    pub fn root(&self) -> &BatonError {
        match self {
            Self::RunFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Partial run data, if the error escaped a run.
    pub fn run_details(&self) -> Option<&RunErrorDetails> {
        match self {
            Self::RunFailed { details, .. } => Some(details),
            _ => None,
        }
    }

    /// Whether this is one of the guardrail tripwire variants.
    pub fn is_tripwire(&self) -> bool {
        matches!(
            self.root(),
            Self::InputGuardrailTripwire { .. }
                | Self::OutputGuardrailTripwire { .. }
                | Self::ToolInputGuardrailTripwire { .. }
                | Self::ToolOutputGuardrailTripwire { .. }
        )
    }

    /// Errors that must abort the run even when raised from inside a tool.
    pub fn aborts_run(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::User
                | ErrorCategory::ModelBehavior
                | ErrorCategory::Guardrail
                | ErrorCategory::TurnLimit
                | ErrorCategory::Canceled
        ) || matches!(self.root(), Self::TaskFailed(_))
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self.root() {
            Self::User(_) => ErrorCategory::User,
            Self::ModelBehavior(_) => ErrorCategory::ModelBehavior,
            Self::InputGuardrailTripwire { .. }
            | Self::OutputGuardrailTripwire { .. }
            | Self::ToolInputGuardrailTripwire { .. }
            | Self::ToolOutputGuardrailTripwire { .. } => ErrorCategory::Guardrail,
            Self::MaxTurnsExceeded { .. } => ErrorCategory::TurnLimit,
            Self::Session(_) => ErrorCategory::Session,
            Self::McpUpstream { .. } => ErrorCategory::Upstream,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Provider { .. } | Self::Stream(_) => ErrorCategory::Provider,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::Canceled => ErrorCategory::Canceled,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit | ErrorCategory::Timeout | ErrorCategory::Upstream
        )
    }

    /// Whether the provider reported a rate limit.
    pub fn is_rate_limit(&self) -> bool {
        match self.root() {
            Self::RateLimited { .. } => true,
            Self::Provider { message, .. } => {
                let lowered = message.to_lowercase();
                lowered.contains("429")
                    || lowered.contains("rate limit")
                    || lowered.contains("too many requests")
            }
            _ => false,
        }
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::RateLimit | ErrorCategory::Upstream => {
                RecoverySuggestion::RetryWithBackoff
            }
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::User | ErrorCategory::Configuration => {
                RecoverySuggestion::CheckConfiguration
            }
            ErrorCategory::TurnLimit => RecoverySuggestion::IncreaseMaxTurns,
            ErrorCategory::Guardrail => RecoverySuggestion::InspectGuardrailOutput,
            ErrorCategory::ToolExecution => RecoverySuggestion::CheckToolImplementation,
            ErrorCategory::ModelBehavior => RecoverySuggestion::ReportModelBehavior,
            _ => RecoverySuggestion::None,
        }
    }
}

impl From<tokio::task::JoinError> for BatonError {
    fn from(error: tokio::task::JoinError) -> Self {
        if error.is_cancelled() {
            Self::Canceled
        } else {
            Self::TaskFailed(error.to_string())
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, BatonError>;
