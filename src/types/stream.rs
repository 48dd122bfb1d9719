//! Streaming types and the delta accumulator.

use serde::{Deserialize, Serialize};

use super::items::{ModelResponse, ReasoningItem, ResponseItem};
use super::message::{AgentToolCall, ModelMessage};
use super::usage::Usage;
use crate::error::BatonError;

/// A low-level event emitted by a streaming provider call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseStreamEvent {
    /// Stream started.
    Created {
        #[serde(default)]
        response_id: Option<String>,
    },
    /// Incremental assistant text.
    TextDelta { delta: String },
    /// Incremental reasoning text.
    ReasoningDelta {
        #[serde(default)]
        item_id: Option<String>,
        delta: String,
    },
    /// A function call started.
    ToolCallStarted { call_id: String, name: String },
    /// A chunk of function call arguments (raw JSON text).
    ToolCallArgumentsDelta { call_id: String, delta: String },
    /// A fragment that arrives whole.
    OutputItemDone { item: ResponseItem },
    /// Stream finished.
    Completed {
        usage: Usage,
        #[serde(default)]
        response_id: Option<String>,
    },
}

enum Slot {
    Text(String),
    Reasoning { id: Option<String>, text: String },
    ToolCall { call_id: String, name: String, arguments: String },
    Item(ResponseItem),
}

/// Folds stream events into a [`ModelResponse`], preserving first-appearance order.
#[derive(Default)]
pub struct ResponseAccumulator {
    slots: Vec<Slot>,
    usage: Usage,
    response_id: Option<String>,
    completed: bool,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a `Completed` event was observed.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn push(&mut self, event: &ResponseStreamEvent) {
        match event {
            ResponseStreamEvent::Created { response_id } => {
                if response_id.is_some() {
                    self.response_id = response_id.clone();
                }
            }
            ResponseStreamEvent::TextDelta { delta } => match self.slots.last_mut() {
                Some(Slot::Text(text)) => text.push_str(delta),
                _ => self.slots.push(Slot::Text(delta.clone())),
            },
            ResponseStreamEvent::ReasoningDelta { item_id, delta } => {
                let existing = self.slots.iter_mut().rev().find_map(|slot| match slot {
                    Slot::Reasoning { id, text } if item_id.is_none() || *id == *item_id => {
                        Some(text)
                    }
                    _ => None,
                });
                match existing {
                    Some(text) => text.push_str(delta),
                    None => self.slots.push(Slot::Reasoning {
                        id: item_id.clone(),
                        text: delta.clone(),
                    }),
                }
            }
            ResponseStreamEvent::ToolCallStarted { call_id, name } => {
                self.slots.push(Slot::ToolCall {
                    call_id: call_id.clone(),
                    name: name.clone(),
                    arguments: String::new(),
                });
            }
            ResponseStreamEvent::ToolCallArgumentsDelta { call_id, delta } => {
                let slot = self.slots.iter_mut().rev().find_map(|slot| match slot {
                    Slot::ToolCall {
                        call_id: id,
                        arguments,
                        ..
                    } if *id == *call_id => Some(arguments),
                    _ => None,
                });
                match slot {
                    Some(arguments) => arguments.push_str(delta),
                    None => tracing::warn!(call_id = %call_id, "Arguments delta for unknown tool call"),
                }
            }
            ResponseStreamEvent::OutputItemDone { item } => {
                self.slots.push(Slot::Item(item.clone()));
            }
            ResponseStreamEvent::Completed { usage, response_id } => {
                self.usage = usage.clone();
                if response_id.is_some() {
                    self.response_id = response_id.clone();
                }
                self.completed = true;
            }
        }
    }

    /// Finish folding. Tool call arguments must be valid JSON.
    pub fn finish(self) -> Result<ModelResponse, BatonError> {
        let mut output = Vec::with_capacity(self.slots.len());
        for slot in self.slots {
            let item = match slot {
                Slot::Text(text) => ResponseItem::Message(ModelMessage::assistant(text)),
                Slot::Reasoning { id, text } => ResponseItem::Reasoning(ReasoningItem {
                    id,
                    summary: vec![text],
                }),
                Slot::ToolCall {
                    call_id,
                    name,
                    arguments,
                } => {
                    let arguments = if arguments.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&arguments).map_err(|e| {
                            BatonError::model_behavior(format!(
                                "Invalid JSON arguments for tool call {call_id} ({name}): {e}"
                            ))
                        })?
                    };
                    ResponseItem::FunctionCall(AgentToolCall::new(call_id, name, arguments))
                }
                Slot::Item(item) => item,
            };
            output.push(item);
        }

        Ok(ModelResponse {
            output,
            usage: self.usage,
            response_id: self.response_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn folds_text_reasoning_and_arguments_in_order() {
        let mut acc = ResponseAccumulator::new();
        let events = vec![
            ResponseStreamEvent::Created {
                response_id: Some("resp_1".into()),
            },
            ResponseStreamEvent::ReasoningDelta {
                item_id: Some("rs_1".into()),
                delta: "think".into(),
            },
            ResponseStreamEvent::ReasoningDelta {
                item_id: Some("rs_1".into()),
                delta: "ing".into(),
            },
            ResponseStreamEvent::TextDelta { delta: "Hel".into() },
            ResponseStreamEvent::TextDelta { delta: "lo".into() },
            ResponseStreamEvent::ToolCallStarted {
                call_id: "call_1".into(),
                name: "lookup".into(),
            },
            ResponseStreamEvent::ToolCallArgumentsDelta {
                call_id: "call_1".into(),
                delta: "{\"q\":".into(),
            },
            ResponseStreamEvent::ToolCallArgumentsDelta {
                call_id: "call_1".into(),
                delta: "\"x\"}".into(),
            },
            ResponseStreamEvent::Completed {
                usage: Usage::single(5, 7),
                response_id: None,
            },
        ];
        for event in &events {
            acc.push(event);
        }
        assert!(acc.is_completed());

        let response = acc.finish().expect("stream should fold");
        assert_eq!(response.response_id.as_deref(), Some("resp_1"));
        assert_eq!(response.usage.total_tokens, 12);
        assert_eq!(response.output.len(), 3);
        assert!(matches!(
            &response.output[0],
            ResponseItem::Reasoning(r) if r.summary == vec!["thinking".to_string()]
        ));
        assert!(matches!(&response.output[1], ResponseItem::Message(m) if m.text() == "Hello"));
        assert!(matches!(
            &response.output[2],
            ResponseItem::FunctionCall(call) if call.arguments == json!({"q": "x"})
        ));
    }

    #[test]
    fn malformed_arguments_are_a_model_behavior_error() {
        let mut acc = ResponseAccumulator::new();
        acc.push(&ResponseStreamEvent::ToolCallStarted {
            call_id: "c".into(),
            name: "t".into(),
        });
        acc.push(&ResponseStreamEvent::ToolCallArgumentsDelta {
            call_id: "c".into(),
            delta: "{oops".into(),
        });

        let err = acc.finish().expect_err("bad JSON should fail");
        assert!(matches!(err, BatonError::ModelBehavior(msg) if msg.contains("Invalid JSON")));
    }
}
