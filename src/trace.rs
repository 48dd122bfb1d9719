//! Append-only run observer.
//!
//! Sinks see what happened and cannot change it. The run loop also logs the
//! same boundaries through `tracing`; a sink is for callers that want the
//! events as data.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailKind {
    Input,
    Output,
    ToolInput,
    ToolOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    RunStarted {
        agent: String,
        workflow_name: String,
    },
    RunEnded {
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    TurnStarted {
        turn: usize,
        agent: String,
    },
    TurnEnded {
        turn: usize,
        agent: String,
    },
    ToolStarted {
        agent: String,
        tool: String,
        call_id: String,
        /// Omitted when sensitive data is excluded.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
    },
    ToolEnded {
        agent: String,
        tool: String,
        call_id: String,
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
    },
    GuardrailEvaluated {
        kind: GuardrailKind,
        name: String,
        triggered: bool,
    },
    HandoffOccurred {
        from: String,
        to: String,
    },
}

/// An event stamped with its trace id and time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceRecord {
    pub trace_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: TraceEvent,
}

pub trait TraceSink: Send + Sync {
    fn record(&self, record: TraceRecord);
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    records: Mutex<Vec<TraceRecord>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.records().into_iter().map(|record| record.event).collect()
    }
}

impl TraceSink for MemoryTraceSink {
    fn record(&self, record: TraceRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}

/// Per-run handle onto an optional sink.
#[derive(Clone)]
pub struct Tracer {
    sink: Option<Arc<dyn TraceSink>>,
    trace_id: Uuid,
    include_sensitive_data: bool,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("trace_id", &self.trace_id)
            .field("enabled", &self.sink.is_some())
            .finish()
    }
}

impl Tracer {
    pub fn new(sink: Option<Arc<dyn TraceSink>>, include_sensitive_data: bool) -> Self {
        Self {
            sink,
            trace_id: Uuid::new_v4(),
            include_sensitive_data,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, false)
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn emit(&self, event: TraceEvent) {
        if let Some(sink) = &self.sink {
            sink.record(TraceRecord {
                trace_id: self.trace_id,
                timestamp: Utc::now(),
                event,
            });
        }
    }

    /// `data` if sensitive data may be recorded.
    pub fn sensitive(&self, data: &serde_json::Value) -> Option<serde_json::Value> {
        self.include_sensitive_data.then(|| data.clone())
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_are_stamped_with_the_run_trace_id() {
        let sink = Arc::new(MemoryTraceSink::new());
        let tracer = Tracer::new(Some(sink.clone()), false);

        tracer.emit(TraceEvent::HandoffOccurred {
            from: "triage".into(),
            to: "billing".into(),
        });

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].trace_id, tracer.trace_id());
        assert_eq!(tracer.sensitive(&json!({"q": 1})), None);
    }

    #[test]
    fn disabled_tracer_records_nothing() {
        let tracer = Tracer::disabled();
        tracer.emit(TraceEvent::TurnStarted {
            turn: 1,
            agent: "a".into(),
        });
        assert_eq!(tracer.sensitive(&json!(1)), None);
    }
}
