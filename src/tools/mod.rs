//! Tool system: function tools, capability tools and the tool-kind registry.

pub mod apply_patch;
pub mod arguments;
pub mod computer;
pub mod registry;
pub mod shell;
pub mod streaming;
pub mod tool;
pub mod types;
pub mod validation;

pub use apply_patch::{ApplyPatchEditor, ApplyPatchResult, ApplyPatchStatus, ApplyPatchTool};
pub use arguments::ToolArguments;
pub use computer::{Computer, ComputerEnvironment, ComputerTool};
pub use registry::{ToolKindRegistry, ToolSpec};
pub use shell::{
    LocalShellExecutor, ShellCommandOutput, ShellCommandRequest, ShellExecutor, ShellOutcome,
    ShellResult, ShellTool,
};
pub use streaming::{StreamingTool, ToolUpdateSender};
pub use tool::{AgentTool, Tool, ToolExecutionContext};
pub use types::{
    AgentToolParameters, ApprovalRequirement, ToolUpdateCallback, ToolUpdatePayload,
};
