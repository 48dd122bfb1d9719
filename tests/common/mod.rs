//! Shared test helpers and a scripted model provider.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use baton::error::{BatonError, Result};
use baton::provider::{ModelProvider, ModelRequest};
use baton::types::*;

/// A provider that replays queued responses and records every request.
#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ModelResponse>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an assistant text reply.
    pub fn queue_text(&self, text: &str) -> &Self {
        self.queue(ModelResponse::new(
            vec![ResponseItem::Message(ModelMessage::assistant(text))],
            Usage::single(10, 20),
        ))
    }

    /// Queue a single function call.
    pub fn queue_tool_call(&self, id: &str, name: &str, args: Value) -> &Self {
        self.queue(ModelResponse::new(
            vec![ResponseItem::FunctionCall(AgentToolCall::new(id, name, args))],
            Usage::single(10, 5),
        ))
    }

    pub fn queue(&self, response: ModelResponse) -> &Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
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
                message: "no response queued".into(),
            })
    }
}

/// Text of every tool output sent in `request`, in order.
pub fn tool_outputs(request: &ModelRequest) -> Vec<String> {
    request
        .input
        .iter()
        .filter_map(|item| match item {
            ResponseItem::FunctionCallOutput(result) => Some(result.text()),
            _ => None,
        })
        .collect()
}
