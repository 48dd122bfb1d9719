//! The run loop: turns, tool execution, approvals, and resumable run state.

pub mod events;
mod execution;
pub mod hooks;
pub mod items;
pub mod runner;
pub mod scope;
pub mod side_table;
pub mod state;
mod turn;
pub mod types;

pub use events::{RunEvent, RunId, RunItemEventName, StreamEvent};
pub use hooks::RunHooks;
pub use items::{last_message_text, RunItem, ToolApprovalItem};
pub use runner::{RunOptions, RunResultStreaming, Runner};
pub use scope::TurnScope;
pub use side_table::{CallSignature, NestedRunOutcome, NestedRunResults};
pub use state::{RunState, SCHEMA_VERSION};
pub use types::*;
