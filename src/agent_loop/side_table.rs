//! Results of nested runs, correlated with the tool call that spawned them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::items::ToolApprovalItem;

/// Content-derived identity of one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSignature {
    pub tool_name: String,
    /// Canonical JSON text of the arguments.
    pub arguments: String,
    pub call_id: String,
}

impl CallSignature {
    pub fn new(
        tool_name: impl Into<String>,
        arguments: &serde_json::Value,
        call_id: impl Into<String>,
    ) -> Self {
        let arguments = match arguments {
            // Arguments sometimes arrive as raw JSON text; normalize so both shapes agree.
            serde_json::Value::String(raw) => serde_json::from_str::<serde_json::Value>(raw)
                .map(|parsed| parsed.to_string())
                .unwrap_or_else(|_| raw.clone()),
            other => other.to_string(),
        };
        Self {
            tool_name: tool_name.into(),
            arguments,
            call_id: call_id.into(),
        }
    }

    /// Stable text key, used where the signature is persisted.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.tool_name, self.call_id, self.arguments)
    }
}

/// What a nested run left behind.
#[derive(Debug, Clone)]
pub struct NestedRunOutcome {
    pub agent_name: String,
    pub final_output: Option<serde_json::Value>,
    /// Approvals the nested run is waiting on.
    pub interruptions: Vec<ToolApprovalItem>,
}

/// Side-table of nested run outcomes. Entries are evicted when consumed.
///
/// Nested runs that paused for approval are also parked here, as state
/// snapshots without a context, until the call that started them runs again.
#[derive(Clone, Default)]
pub struct NestedRunResults {
    inner: Arc<Mutex<HashMap<CallSignature, NestedRunOutcome>>>,
    parked: Arc<Mutex<HashMap<String, serde_json::Value>>>,
}

impl NestedRunResults {
    pub(crate) fn with_parked(parked: HashMap<String, serde_json::Value>) -> Self {
        Self {
            inner: Arc::default(),
            parked: Arc::new(Mutex::new(parked)),
        }
    }

    /// Keep a suspended nested run's state until its call is retried.
    pub fn park(&self, signature: &CallSignature, state: serde_json::Value) {
        self.parked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(signature.key(), state);
    }

    /// Remove and return the state parked for `signature`.
    pub fn take_parked(&self, signature: &CallSignature) -> Option<serde_json::Value> {
        self.parked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&signature.key())
    }

    pub(crate) fn parked_snapshots(&self) -> HashMap<String, serde_json::Value> {
        self.parked.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn record(&self, signature: CallSignature, outcome: NestedRunOutcome) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(signature, outcome);
    }

    /// Remove and return the outcome recorded for `signature`.
    pub fn consume(&self, signature: &CallSignature) -> Option<NestedRunOutcome> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(signature)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
