//! Unified error classification and recovery.

use serde::{Deserialize, Serialize};

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Caller misconfiguration (duplicate tools, missing capabilities).
    User,
    /// The model referenced something that does not exist or broke the output contract.
    ModelBehavior,
    /// A guardrail tripwire fired.
    Guardrail,
    /// The run hit its turn ceiling.
    TurnLimit,
    Session,
    RateLimit,
    Timeout,
    Provider,
    Configuration,
    Serialization,
    ToolExecution,
    Upstream,
    Canceled,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    CheckConfiguration,
    IncreaseTimeout,
    IncreaseMaxTurns,
    InspectGuardrailOutput,
    CheckToolImplementation,
    ReportModelBehavior,
    None,
}
