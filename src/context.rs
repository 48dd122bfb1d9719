//! Run context shared by every tool, guardrail and hook of one run.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::agent_loop::side_table::NestedRunResults;
use crate::types::usage::Usage;
use crate::util::usage::UsageTracker;

/// Either every call of a tool, or an explicit list of call ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApprovalScope {
    All(bool),
    CallIds(Vec<String>),
}

impl Default for ApprovalScope {
    fn default() -> Self {
        Self::CallIds(Vec::new())
    }
}

impl ApprovalScope {
    fn is_all(&self) -> bool {
        matches!(self, Self::All(true))
    }

    fn contains(&self, call_id: &str) -> bool {
        match self {
            Self::All(all) => *all,
            Self::CallIds(ids) => ids.iter().any(|id| id == call_id),
        }
    }

    fn insert(&mut self, call_id: &str) {
        match self {
            Self::All(true) => {}
            Self::All(false) => *self = Self::CallIds(vec![call_id.to_string()]),
            Self::CallIds(ids) => {
                if !ids.iter().any(|id| id == call_id) {
                    ids.push(call_id.to_string());
                }
            }
        }
    }

    fn remove(&mut self, call_id: &str) {
        if let Self::CallIds(ids) = self {
            ids.retain(|id| id != call_id);
        }
    }
}

/// Approval decisions recorded for one tool name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    #[serde(default)]
    pub approved: ApprovalScope,
    #[serde(default)]
    pub rejected: ApprovalScope,
    /// Outputs supplied by the approver in place of running the tool.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub override_outputs: HashMap<String, serde_json::Value>,
    /// Messages fed back to the model for rejected calls.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub rejection_messages: HashMap<String, String>,
}

/// The serializable part of a [`RunContext`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub approvals: HashMap<String, ApprovalRecord>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Screenshots already sent to the model, so a resumed run does not resend them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub screenshot_hashes: Vec<String>,
    /// Suspended nested runs, keyed by the tool call that started them.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub nested_runs: HashMap<String, serde_json::Value>,
}

/// Context passed by reference through a run.
///
/// Clones share state. The framework does not lock around the caller's
/// value; concurrent mutation safety is up to the value itself.
#[derive(Clone, Default)]
pub struct RunContext {
    value: Option<Arc<dyn Any + Send + Sync>>,
    metadata: Arc<RwLock<serde_json::Value>>,
    usage: UsageTracker,
    approvals: Arc<RwLock<HashMap<String, ApprovalRecord>>>,
    nested_results: NestedRunResults,
    screenshot_hashes: Arc<Mutex<HashSet<String>>>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("value", &self.value.as_ref().map(|_| ".."))
            .field("usage", &self.usage.total_usage())
            .finish()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a caller-defined value, retrievable with [`RunContext::value`].
    pub fn with_value<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.value = Some(Arc::new(value));
        self
    }

    /// Attach serializable metadata that survives a state snapshot.
    pub fn with_metadata(self, metadata: serde_json::Value) -> Self {
        *self.metadata.write().unwrap_or_else(|e| e.into_inner()) = metadata;
        self
    }

    /// The caller-defined value, if one of type `T` was attached.
    pub fn value<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value.clone()?.downcast::<T>().ok()
    }

    pub fn metadata(&self) -> serde_json::Value {
        self.metadata.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn update_metadata(&self, update: impl FnOnce(&mut serde_json::Value)) {
        let mut metadata = self.metadata.write().unwrap_or_else(|e| e.into_inner());
        update(&mut metadata);
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn nested_results(&self) -> &NestedRunResults {
        &self.nested_results
    }

    /// Take the caller value from `other` when it has one.
    pub(crate) fn inherit_value(&mut self, other: &RunContext) {
        if other.value.is_some() {
            self.value = other.value.clone();
        }
    }

    /// Remember a screenshot hash. Returns `false` if it was already sent in this run.
    pub fn remember_screenshot(&self, hash: &str) -> bool {
        self.screenshot_hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(hash.to_string())
    }

    /// `Some(true)` approved, `Some(false)` rejected, `None` undecided.
    pub fn approval_status(&self, tool_name: &str, call_id: &str) -> Option<bool> {
        let approvals = self.approvals.read().unwrap_or_else(|e| e.into_inner());
        let record = approvals.get(tool_name)?;
        if record.approved.is_all() {
            return Some(true);
        }
        if record.rejected.is_all() {
            return Some(false);
        }
        if record.approved.contains(call_id) {
            return Some(true);
        }
        if record.rejected.contains(call_id) {
            return Some(false);
        }
        None
    }

    pub fn approve_tool(&self, tool_name: &str, call_id: &str, always: bool) {
        let mut approvals = self.approvals.write().unwrap_or_else(|e| e.into_inner());
        let record = approvals.entry(tool_name.to_string()).or_default();
        if always {
            record.approved = ApprovalScope::All(true);
            record.rejected = ApprovalScope::default();
        } else {
            record.approved.insert(call_id);
            record.rejected.remove(call_id);
        }
        record.rejection_messages.remove(call_id);
    }

    /// Approve a call but use `output` instead of running the tool.
    pub fn approve_tool_with_output(
        &self,
        tool_name: &str,
        call_id: &str,
        output: serde_json::Value,
    ) {
        self.approve_tool(tool_name, call_id, false);
        let mut approvals = self.approvals.write().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = approvals.get_mut(tool_name) {
            record.override_outputs.insert(call_id.to_string(), output);
        }
    }

    pub fn reject_tool(
        &self,
        tool_name: &str,
        call_id: &str,
        always: bool,
        message: Option<String>,
    ) {
        let mut approvals = self.approvals.write().unwrap_or_else(|e| e.into_inner());
        let record = approvals.entry(tool_name.to_string()).or_default();
        if always {
            record.rejected = ApprovalScope::All(true);
            record.approved = ApprovalScope::default();
        } else {
            record.rejected.insert(call_id);
            record.approved.remove(call_id);
        }
        record.override_outputs.remove(call_id);
        match message {
            Some(message) => {
                record.rejection_messages.insert(call_id.to_string(), message);
            }
            None => {
                record.rejection_messages.remove(call_id);
            }
        }
    }

    pub fn override_output(&self, tool_name: &str, call_id: &str) -> Option<serde_json::Value> {
        let approvals = self.approvals.read().unwrap_or_else(|e| e.into_inner());
        approvals.get(tool_name)?.override_outputs.get(call_id).cloned()
    }

    pub fn rejection_message(&self, tool_name: &str, call_id: &str) -> Option<String> {
        let approvals = self.approvals.read().unwrap_or_else(|e| e.into_inner());
        approvals.get(tool_name)?.rejection_messages.get(call_id).cloned()
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            usage: self.usage.total_usage(),
            approvals: self
                .approvals
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            metadata: self.metadata(),
            screenshot_hashes: {
                let hashes = self.screenshot_hashes.lock().unwrap_or_else(|e| e.into_inner());
                let mut hashes: Vec<String> = hashes.iter().cloned().collect();
                hashes.sort();
                hashes
            },
            nested_runs: self.nested_results.parked_snapshots(),
        }
    }

    /// Rebuild a context from a snapshot. Caller values must be re-attached,
    /// see [`crate::agent_loop::state::RunState::with_context_value`].
    pub fn from_snapshot(snapshot: ContextSnapshot) -> Self {
        Self {
            value: None,
            metadata: Arc::new(RwLock::new(snapshot.metadata)),
            usage: UsageTracker::from_usage(snapshot.usage),
            approvals: Arc::new(RwLock::new(snapshot.approvals)),
            nested_results: NestedRunResults::with_parked(snapshot.nested_runs),
            screenshot_hashes: Arc::new(Mutex::new(snapshot.screenshot_hashes.into_iter().collect())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn per_call_decisions_are_scoped_to_the_call() {
        let ctx = RunContext::new();
        ctx.approve_tool("weather", "call_1", false);
        ctx.reject_tool("weather", "call_2", false, Some("not now".into()));

        assert_eq!(ctx.approval_status("weather", "call_1"), Some(true));
        assert_eq!(ctx.approval_status("weather", "call_2"), Some(false));
        assert_eq!(ctx.approval_status("weather", "call_3"), None);
        assert_eq!(
            ctx.rejection_message("weather", "call_2").as_deref(),
            Some("not now")
        );
    }

    #[test]
    fn always_approve_covers_future_calls() {
        let ctx = RunContext::new();
        ctx.reject_tool("weather", "call_1", false, None);
        ctx.approve_tool("weather", "call_1", true);

        assert_eq!(ctx.approval_status("weather", "call_1"), Some(true));
        assert_eq!(ctx.approval_status("weather", "anything"), Some(true));
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let ctx = RunContext::new().with_metadata(json!({"user": "ada"}));
        ctx.approve_tool("weather", "call_1", false);
        ctx.approve_tool_with_output("search", "call_9", json!("cached"));
        ctx.usage().record(&Usage::single(3, 4));

        let value = serde_json::to_value(ctx.snapshot()).expect("snapshot should serialize");
        let restored = RunContext::from_snapshot(
            serde_json::from_value(value).expect("snapshot should deserialize"),
        );

        assert_eq!(restored.approval_status("weather", "call_1"), Some(true));
        assert_eq!(
            restored.override_output("search", "call_9"),
            Some(json!("cached"))
        );
        assert_eq!(restored.metadata(), json!({"user": "ada"}));
        assert_eq!(restored.usage().total_usage().total_tokens, 7);
    }

    #[test]
    fn caller_value_downcasts_by_type() {
        let ctx = RunContext::new().with_value(42_u32);
        assert_eq!(ctx.value::<u32>().as_deref(), Some(&42));
        assert!(ctx.value::<String>().is_none());
    }

    #[test]
    fn sent_screenshots_survive_a_snapshot() {
        let ctx = RunContext::new();
        assert!(ctx.remember_screenshot("b"));
        assert!(ctx.remember_screenshot("a"));

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.screenshot_hashes, vec!["a".to_string(), "b".to_string()]);

        let text = serde_json::to_string(&snapshot).expect("snapshot should serialize");
        let restored = RunContext::from_snapshot(
            serde_json::from_str(&text).expect("snapshot should deserialize"),
        );
        assert!(!restored.remember_screenshot("a"));
        assert!(restored.remember_screenshot("c"));
    }

    #[test]
    fn inherited_value_replaces_only_when_present() {
        let mut restored = RunContext::new().with_value(1_u8);
        restored.inherit_value(&RunContext::new());
        assert_eq!(restored.value::<u8>().as_deref(), Some(&1));

        restored.inherit_value(&RunContext::new().with_value(String::from("acme")));
        assert_eq!(restored.value::<String>().as_deref().map(String::as_str), Some("acme"));
    }

    #[test]
    fn screenshot_hashes_are_remembered_once() {
        let ctx = RunContext::new();
        assert!(ctx.remember_screenshot("abc"));
        assert!(!ctx.remember_screenshot("abc"));
    }
}
