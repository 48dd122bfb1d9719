//! Convenience re-exports for common use.

pub use crate::agent::{Agent, Handoff, OutputSchema, ToolUseBehavior};
pub use crate::agent_loop::{
    RunEvent, RunHooks, RunInput, RunItem, RunOptions, RunResult, RunResultStreaming, RunState,
    RunStatus, Runner, StreamEvent, ToolApprovalItem,
};
pub use crate::config::{CallModelData, ModelInputData, RunConfig};
pub use crate::context::RunContext;
pub use crate::error::{BatonError, Result};
pub use crate::guardrail::{GuardrailFunctionOutput, InputGuardrail, OutputGuardrail};
pub use crate::provider::{ModelProvider, ModelRequest};
pub use crate::session::{InMemorySession, MemorySessionStore, Session};
pub use crate::tools::{AgentTool, AgentToolParameters, ApprovalRequirement, Tool, ToolArguments};
pub use crate::types::{ModelMessage, ModelResponse, ResponseItem, Usage};
