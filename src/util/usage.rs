//! Usage tracking shared across the units of work of a run.

use std::sync::{Arc, RwLock};

use crate::types::usage::Usage;

/// Tracks cumulative usage across provider calls.
///
/// Clones share the same counters.
#[derive(Clone, Debug)]
pub struct UsageTracker {
    inner: Arc<RwLock<Usage>>,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::from_usage(Usage::default())
    }

    /// Start from a previously accumulated total (used on resume).
    pub fn from_usage(usage: Usage) -> Self {
        Self {
            inner: Arc::new(RwLock::new(usage)),
        }
    }

    /// Record usage from one provider call.
    pub fn record(&self, usage: &Usage) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.add(usage);
    }

    /// Get total usage.
    pub fn total_usage(&self) -> Usage {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of provider calls recorded.
    pub fn request_count(&self) -> u64 {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).requests
    }

    /// Reset all tracking.
    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *inner = Usage::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let tracker = UsageTracker::new();
        let other = tracker.clone();

        tracker.record(&Usage::single(10, 5));
        other.record(&Usage::single(1, 1));

        assert_eq!(tracker.request_count(), 2);
        assert_eq!(other.total_usage().total_tokens, 17);

        tracker.reset();
        assert_eq!(other.request_count(), 0);
    }
}
