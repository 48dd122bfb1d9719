//! Provider-native output fragments and model responses.

use serde::{Deserialize, Serialize};

use super::message::{AgentToolCall, AgentToolResult, ModelMessage};
use super::usage::Usage;

/// One fragment of model input or output.
///
/// The set is closed: every kind has exactly one decoder in the turn
/// processor, and kinds that are not valid model output are rejected there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseItem {
    Message(ModelMessage),
    Reasoning(ReasoningItem),
    FunctionCall(AgentToolCall),
    FunctionCallOutput(AgentToolResult),
    ComputerCall(ComputerCall),
    ShellCall(ShellCall),
    ApplyPatchCall(ApplyPatchCall),
    McpCall(McpCall),
    Compaction(CompactionItem),
}

impl ResponseItem {
    /// Kind name used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Reasoning(_) => "reasoning",
            Self::FunctionCall(_) => "function_call",
            Self::FunctionCallOutput(_) => "function_call_output",
            Self::ComputerCall(_) => "computer_call",
            Self::ShellCall(_) => "shell_call",
            Self::ApplyPatchCall(_) => "apply_patch_call",
            Self::McpCall(_) => "mcp_call",
            Self::Compaction(_) => "compaction",
        }
    }

    /// Call id of a tool call or tool output fragment.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::FunctionCall(call) => Some(&call.id),
            Self::FunctionCallOutput(result) => Some(&result.tool_call_id),
            Self::ComputerCall(call) => Some(&call.call_id),
            Self::ShellCall(call) => Some(&call.call_id),
            Self::ApplyPatchCall(call) => Some(&call.call_id),
            Self::McpCall(call) => Some(&call.id),
            _ => None,
        }
    }
}

impl From<ModelMessage> for ResponseItem {
    fn from(message: ModelMessage) -> Self {
        Self::Message(message)
    }
}

/// Model reasoning, folded into one logical item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReasoningItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub summary: Vec<String>,
}

/// Opaque context-compaction record. Passed through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompactionItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A computer-use action requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputerCall {
    pub call_id: String,
    pub action: ComputerAction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Wheel,
    Back,
    Forward,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComputerAction {
    Click {
        x: i32,
        y: i32,
        #[serde(default)]
        button: MouseButton,
    },
    DoubleClick { x: i32, y: i32 },
    Drag { path: Vec<Point> },
    Keypress { keys: Vec<String> },
    Move { x: i32, y: i32 },
    Screenshot,
    Scroll {
        x: i32,
        y: i32,
        scroll_x: i32,
        scroll_y: i32,
    },
    Type { text: String },
    Wait,
}

/// A shell invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShellCall {
    pub call_id: String,
    pub action: ShellAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ShellAction {
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_length: Option<usize>,
}

/// A file edit requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplyPatchCall {
    pub call_id: String,
    pub operation: ApplyPatchOperation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPatchOperationKind {
    CreateFile,
    UpdateFile,
    DeleteFile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplyPatchOperation {
    #[serde(rename = "type")]
    pub kind: ApplyPatchOperationKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// A tool call executed by a hosted tool server, delivered with its result attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpCall {
    pub id: String,
    pub server_label: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The result of one provider call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelResponse {
    pub output: Vec<ResponseItem>,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl ModelResponse {
    pub fn new(output: Vec<ResponseItem>, usage: Usage) -> Self {
        Self {
            output,
            usage,
            response_id: None,
        }
    }

    pub fn with_response_id(mut self, response_id: impl Into<String>) -> Self {
        self.response_id = Some(response_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn items_serialize_with_type_tag() {
        let item = ResponseItem::ShellCall(ShellCall {
            call_id: "call_1".into(),
            action: ShellAction {
                commands: vec!["ls".into()],
                ..Default::default()
            },
        });

        let value = serde_json::to_value(&item).expect("shell call should serialize");
        assert_eq!(value["type"], "shell_call");
        assert_eq!(value["action"]["commands"], json!(["ls"]));

        let back: ResponseItem =
            serde_json::from_value(value).expect("shell call should deserialize");
        assert_eq!(back.call_id(), Some("call_1"));
    }

    #[test]
    fn computer_action_decodes_from_wire_shape() {
        let action: ComputerAction =
            serde_json::from_value(json!({"type": "click", "x": 3, "y": 4}))
                .expect("click should decode");
        assert_eq!(
            action,
            ComputerAction::Click {
                x: 3,
                y: 4,
                button: MouseButton::Left
            }
        );
    }
}
