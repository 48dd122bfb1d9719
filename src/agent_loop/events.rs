//! Run event stream types.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::items::RunItem;
use crate::tools::types::ToolUpdatePayload;
use crate::types::stream::ResponseStreamEvent;

/// Unique run identifier.
pub type RunId = Uuid;

/// Why a run item was emitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunItemEventName {
    MessageOutputCreated,
    ToolCalled,
    ToolOutput,
    HandoffRequested,
    HandoffOccurred,
    ReasoningItemCreated,
    CompactionCreated,
    ToolApprovalRequested,
}

impl RunItemEventName {
    pub fn for_item(item: &RunItem) -> Self {
        match item {
            RunItem::MessageOutput { .. } => Self::MessageOutputCreated,
            RunItem::ToolCall { .. } => Self::ToolCalled,
            RunItem::ToolCallOutput { .. } => Self::ToolOutput,
            RunItem::HandoffCall { .. } => Self::HandoffRequested,
            RunItem::HandoffOutput { .. } => Self::HandoffOccurred,
            RunItem::Reasoning { .. } => Self::ReasoningItemCreated,
            RunItem::Compaction { .. } => Self::CompactionCreated,
            RunItem::ToolApproval(_) => Self::ToolApprovalRequested,
        }
    }
}

/// Concrete event payloads emitted by a streamed run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Provider event, forwarded as it arrives.
    RawResponse { event: ResponseStreamEvent },
    /// A run item, emitted once the turn that produced it is resolved.
    RunItemCreated { name: RunItemEventName, item: RunItem },
    /// The active agent changed.
    AgentUpdated { agent: String },
    /// A tool reported progress before its terminal result.
    ToolProgress {
        call_id: String,
        tool_name: String,
        update: ToolUpdatePayload,
    },
    /// A rate-limited model stream is being retried. Raw events already
    /// forwarded for this model call are superseded by the retry's.
    StreamRestarted { attempt: u32 },
}

/// Envelope for streaming run events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunEvent {
    pub run_id: RunId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: StreamEvent,
}

/// Stamps and forwards events to a streamed run's consumer.
///
/// Emitting on a detached emitter, or after the consumer went away, is a no-op.
#[derive(Clone, Debug)]
pub(crate) struct RunEventEmitter {
    run_id: RunId,
    seq: Arc<AtomicU64>,
    tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl RunEventEmitter {
    pub(crate) fn new(run_id: RunId, tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        Self {
            run_id,
            seq: Arc::new(AtomicU64::new(0)),
            tx: Some(tx),
        }
    }

    pub(crate) fn detached() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            seq: Arc::new(AtomicU64::new(0)),
            tx: None,
        }
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.tx.is_some()
    }

    pub(crate) fn emit(&self, payload: StreamEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        let event = RunEvent {
            run_id: self.run_id,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            payload,
        };
        let _ = tx.send(event);
    }

    pub(crate) fn emit_items(&self, items: &[RunItem]) {
        if !self.is_attached() {
            return;
        }
        for item in items {
            self.emit(StreamEvent::RunItemCreated {
                name: RunItemEventName::for_item(item),
                item: item.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::ModelMessage;

    #[test]
    fn events_are_sequenced_per_run() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let run_id = Uuid::new_v4();
        let emitter = RunEventEmitter::new(run_id, tx);

        emitter.emit(StreamEvent::AgentUpdated {
            agent: "triage".into(),
        });
        emitter.clone().emit_items(&[RunItem::MessageOutput {
            agent: "triage".into(),
            raw: ModelMessage::assistant("hi"),
        }]);

        let first = rx.try_recv().expect("first event should be queued");
        let second = rx.try_recv().expect("second event should be queued");
        assert_eq!((first.seq, second.seq), (0, 1));
        assert_eq!(second.run_id, run_id);
        assert!(matches!(
            second.payload,
            StreamEvent::RunItemCreated {
                name: RunItemEventName::MessageOutputCreated,
                ..
            }
        ));
    }

    #[test]
    fn detached_emitter_drops_events() {
        let emitter = RunEventEmitter::detached();
        assert!(!emitter.is_attached());
        emitter.emit(StreamEvent::AgentUpdated { agent: "a".into() });
    }
}
