//! Tools that push intermediate notifications before their terminal result.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::arguments::ToolArguments;
use super::tool::{Tool, ToolExecutionContext};
use super::types::{AgentToolParameters, ApprovalRequirement, ToolUpdateCallback, ToolUpdatePayload};
use crate::error::BatonError;

/// Push side of a streaming tool's notification channel.
#[derive(Clone, Debug)]
pub struct ToolUpdateSender {
    tx: mpsc::UnboundedSender<ToolUpdatePayload>,
}

impl ToolUpdateSender {
    /// Send a notification. Returns `false` once the run stopped listening.
    pub fn send(&self, update: ToolUpdatePayload) -> bool {
        self.tx.send(update).is_ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(ToolUpdatePayload::text(text))
    }
}

type StreamingHandler = dyn Fn(
        ToolArguments,
        ToolExecutionContext,
        ToolUpdateSender,
    ) -> BoxFuture<'static, Result<serde_json::Value, BatonError>>
    + Send
    + Sync;

/// A closure tool that reports progress through a [`ToolUpdateSender`].
///
/// Notifications are forwarded live to the run's stream consumer; only the
/// handler's return value becomes the tool output.
pub struct StreamingTool {
    name: String,
    description: String,
    parameters: AgentToolParameters,
    handler: Arc<StreamingHandler>,
    approval: ApprovalRequirement,
}

impl StreamingTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: AgentToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext, ToolUpdateSender) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, BatonError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args, ctx, updates| Box::pin(handler(args, ctx, updates))),
            approval: ApprovalRequirement::Never,
        }
    }

    pub fn with_needs_approval(mut self, approval: ApprovalRequirement) -> Self {
        self.approval = approval;
        self
    }
}

#[async_trait]
impl Tool for StreamingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &AgentToolParameters {
        &self.parameters
    }

    fn needs_approval(&self) -> ApprovalRequirement {
        self.approval.clone()
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, BatonError> {
        self.execute_ext(args, ctx, CancellationToken::new(), None)
            .await
    }

    async fn execute_ext(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
        cancel: CancellationToken,
        on_update: Option<ToolUpdateCallback>,
    ) -> Result<serde_json::Value, BatonError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = (self.handler)(args.clone(), ctx.clone(), ToolUpdateSender { tx });
        tokio::pin!(run);

        let forward = |update: ToolUpdatePayload| {
            if let Some(callback) = &on_update {
                callback(update);
            }
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BatonError::Canceled),
                Some(update) = rx.recv() => forward(update),
                result = &mut run => {
                    while let Ok(update) = rx.try_recv() {
                        forward(update);
                    }
                    return result;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn counting_tool() -> StreamingTool {
        StreamingTool::new(
            "count",
            "counts to three",
            AgentToolParameters::empty(),
            |_args, _ctx, updates: ToolUpdateSender| async move {
                for n in 1..=3 {
                    updates.send_text(format!("step {n}"));
                    tokio::task::yield_now().await;
                }
                Ok(json!("finished"))
            },
        )
    }

    #[tokio::test]
    async fn forwards_every_update_in_order_before_the_result() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ToolUpdateCallback = Arc::new(move |update: ToolUpdatePayload| {
            sink.lock().expect("lock should succeed").push(update);
        });

        let result = counting_tool()
            .execute_ext(
                &ToolArguments::new(json!({})),
                &ToolExecutionContext::default(),
                CancellationToken::new(),
                Some(callback),
            )
            .await
            .expect("streaming tool should finish");

        assert_eq!(result, json!("finished"));
        let seen = seen.lock().expect("lock should succeed");
        assert_eq!(
            *seen,
            vec![
                ToolUpdatePayload::text("step 1"),
                ToolUpdatePayload::text("step 2"),
                ToolUpdatePayload::text("step 3"),
            ]
        );
    }

    #[tokio::test]
    async fn cancellation_stops_the_tool() {
        let tool = StreamingTool::new(
            "forever",
            "never finishes",
            AgentToolParameters::empty(),
            |_args, _ctx, _updates| async move {
                futures::future::pending::<()>().await;
                Ok(json!(null))
            },
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = tool
            .execute_ext(
                &ToolArguments::new(json!({})),
                &ToolExecutionContext::default(),
                cancel,
                None,
            )
            .await
            .expect_err("canceled tool should fail");
        assert!(matches!(err, BatonError::Canceled));
    }
}
