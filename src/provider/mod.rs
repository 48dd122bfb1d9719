//! Model provider contract.
//!
//! Concrete adapters live outside this crate. They receive a
//! [`ModelRequest`] and return a [`ModelResponse`], or a stream of
//! [`ResponseStreamEvent`]s that the run loop folds with a
//! [`ResponseAccumulator`](crate::types::stream::ResponseAccumulator).

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::agent::OutputSchema;
use crate::error::Result;
use crate::tools::registry::{ToolKindRegistry, ToolSpec};
use crate::types::items::{ModelResponse, ResponseItem};
use crate::types::settings::{ModelSettings, ModelTracing};
use crate::types::stream::ResponseStreamEvent;

/// Everything a provider needs for one call.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    /// Model name; `None` lets the provider pick its default.
    pub model: Option<String>,
    pub system_instructions: Option<String>,
    pub input: Vec<ResponseItem>,
    pub tools: Vec<ToolSpec>,
    /// Handoffs, declared as function tools.
    pub handoffs: Vec<ToolSpec>,
    pub output_schema: Option<OutputSchema>,
    pub settings: ModelSettings,
    pub tracing: ModelTracing,
    /// Chains this call onto a previous server-side response.
    pub previous_response_id: Option<String>,
    pub tool_kinds: ToolKindRegistry,
}

impl ModelRequest {
    /// Tools and handoffs in wire shape, converted through the tool-kind registry.
    pub fn converted_tools(&self) -> Vec<serde_json::Value> {
        let mut converted = self.tool_kinds.convert_all(&self.tools);
        converted.extend(self.tool_kinds.convert_all(&self.handoffs));
        converted
    }
}

/// Core trait implemented by model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name used in logs and errors.
    fn name(&self) -> &str;

    /// One complete (non-streaming) response.
    async fn get_response(&self, request: &ModelRequest) -> Result<ModelResponse>;

    /// Streamed response.
    ///
    /// The default implementation replays [`ModelProvider::get_response`]
    /// as events: message text as one delta, every other fragment whole.
    async fn stream_response(
        &self,
        request: &ModelRequest,
    ) -> Result<BoxStream<'static, Result<ResponseStreamEvent>>> {
        let response = self.get_response(request).await?;
        let stream = async_stream::stream! {
            for event in replay_events(response) {
                yield Ok(event);
            }
        };
        Ok(Box::pin(stream))
    }
}

fn replay_events(response: ModelResponse) -> Vec<ResponseStreamEvent> {
    let mut events = vec![ResponseStreamEvent::Created {
        response_id: response.response_id.clone(),
    }];
    for item in response.output {
        match item {
            // Text deltas are only lossless for plain assistant text.
            ResponseItem::Message(message) if message.refusal().is_none() && message.id.is_none() => {
                events.push(ResponseStreamEvent::TextDelta {
                    delta: message.text(),
                });
            }
            other => events.push(ResponseStreamEvent::OutputItemDone { item: other }),
        }
    }
    events.push(ResponseStreamEvent::Completed {
        usage: response.usage,
        response_id: response.response_id,
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::{AgentToolCall, ModelMessage};
    use crate::types::stream::ResponseAccumulator;
    use crate::types::usage::Usage;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixed(ModelResponse);

    #[async_trait]
    impl ModelProvider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn get_response(&self, _request: &ModelRequest) -> Result<ModelResponse> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn default_stream_folds_back_into_the_response() {
        let response = ModelResponse::new(
            vec![
                ResponseItem::Message(ModelMessage::assistant("checking")),
                ResponseItem::FunctionCall(AgentToolCall::new(
                    "call_1",
                    "get_weather",
                    json!({"city": "Oakland"}),
                )),
            ],
            Usage::single(10, 5),
        )
        .with_response_id("resp_1");
        let provider = Fixed(response.clone());

        let mut events = provider
            .stream_response(&ModelRequest::default())
            .await
            .expect("stream should open");
        let mut accumulator = ResponseAccumulator::new();
        while let Some(event) = events.next().await {
            accumulator.push(&event.expect("event should be ok"));
        }

        assert!(accumulator.is_completed());
        let folded = accumulator.finish().expect("stream should fold");
        assert_eq!(folded.output.len(), 2);
        assert_eq!(folded.usage, response.usage);
        assert_eq!(folded.response_id.as_deref(), Some("resp_1"));
    }

    #[test]
    fn handoffs_are_converted_after_tools() {
        let request = ModelRequest {
            tools: vec![ToolSpec::function("lookup", "", json!({}))],
            handoffs: vec![ToolSpec::function("transfer_to_billing", "", json!({}))],
            ..ModelRequest::default()
        };

        let names: Vec<_> = request
            .converted_tools()
            .into_iter()
            .map(|tool| tool["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("lookup"), json!("transfer_to_billing")]);
    }
}
