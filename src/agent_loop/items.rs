//! Items generated during a run.

use serde::{Deserialize, Serialize};

use crate::types::items::{CompactionItem, ReasoningItem, ResponseItem};
use crate::types::message::{AgentToolCall, AgentToolResult, ModelMessage};

/// A tool call waiting on a human decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolApprovalItem {
    pub agent: String,
    pub tool_name: String,
    pub call_id: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    /// The model fragment that requested the call.
    pub raw: ResponseItem,
}

/// One thing that happened during a run.
///
/// `agent` is the producing agent's name and is informational only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunItem {
    MessageOutput {
        agent: String,
        raw: ModelMessage,
    },
    ToolCall {
        agent: String,
        raw: ResponseItem,
    },
    ToolCallOutput {
        agent: String,
        raw: AgentToolResult,
    },
    HandoffCall {
        agent: String,
        raw: AgentToolCall,
    },
    HandoffOutput {
        agent: String,
        raw: AgentToolResult,
        source_agent: String,
        target_agent: String,
    },
    Reasoning {
        agent: String,
        raw: ReasoningItem,
    },
    Compaction {
        agent: String,
        raw: CompactionItem,
    },
    ToolApproval(ToolApprovalItem),
}

impl RunItem {
    pub fn agent_name(&self) -> &str {
        match self {
            Self::MessageOutput { agent, .. }
            | Self::ToolCall { agent, .. }
            | Self::ToolCallOutput { agent, .. }
            | Self::HandoffCall { agent, .. }
            | Self::HandoffOutput { agent, .. }
            | Self::Reasoning { agent, .. }
            | Self::Compaction { agent, .. } => agent,
            Self::ToolApproval(item) => &item.agent,
        }
    }

    /// Call id of a call or output item.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::ToolCall { raw, .. } => raw.call_id(),
            Self::ToolCallOutput { raw, .. } | Self::HandoffOutput { raw, .. } => {
                Some(&raw.tool_call_id)
            }
            Self::HandoffCall { raw, .. } => Some(&raw.id),
            Self::ToolApproval(item) => Some(&item.call_id),
            _ => None,
        }
    }

    /// The model input equivalent. Approval placeholders have none.
    pub fn to_input_item(&self) -> Option<ResponseItem> {
        match self {
            Self::MessageOutput { raw, .. } => Some(ResponseItem::Message(raw.clone())),
            Self::ToolCall { raw, .. } => Some(raw.clone()),
            Self::ToolCallOutput { raw, .. } | Self::HandoffOutput { raw, .. } => {
                Some(ResponseItem::FunctionCallOutput(raw.clone()))
            }
            Self::HandoffCall { raw, .. } => Some(ResponseItem::FunctionCall(raw.clone())),
            Self::Reasoning { raw, .. } => Some(ResponseItem::Reasoning(raw.clone())),
            Self::Compaction { raw, .. } => Some(ResponseItem::Compaction(raw.clone())),
            Self::ToolApproval(_) => None,
        }
    }

    pub fn is_tool_output(&self) -> bool {
        matches!(self, Self::ToolCallOutput { .. } | Self::HandoffOutput { .. })
    }
}

/// Text of the last assistant message among `items`.
pub fn last_message_text(items: &[RunItem]) -> Option<String> {
    items.iter().rev().find_map(|item| match item {
        RunItem::MessageOutput { raw, .. } => Some(raw.text()),
        _ => None,
    })
}
