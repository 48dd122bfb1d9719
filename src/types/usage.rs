//! Token usage and cost accounting.

use serde::{Deserialize, Serialize};

/// Cached-input detail for a usage record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct InputTokensDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

/// Reasoning detail for a usage record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct OutputTokensDetails {
    #[serde(default)]
    pub reasoning_tokens: u64,
}

/// Usage of one provider call, retained for tiered cost schemes.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RequestUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub input_tokens_details: InputTokensDetails,
    #[serde(default)]
    pub output_tokens_details: OutputTokensDetails,
}

/// Aggregated token usage for one call or a whole run.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Usage {
    /// Number of provider calls represented.
    #[serde(default)]
    pub requests: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub input_tokens_details: InputTokensDetails,
    #[serde(default)]
    pub output_tokens_details: OutputTokensDetails,
    /// Ordered breakdown of single-call usages merged into this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_usage_entries: Vec<RequestUsage>,
    /// Provider-reported cost. Never estimated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Usage {
    /// Usage for a single provider call.
    pub fn single(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            requests: 1,
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            ..Default::default()
        }
    }

    pub fn with_cached_tokens(mut self, cached_tokens: u64) -> Self {
        self.input_tokens_details.cached_tokens = cached_tokens;
        self
    }

    pub fn with_reasoning_tokens(mut self, reasoning_tokens: u64) -> Self {
        self.output_tokens_details.reasoning_tokens = reasoning_tokens;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    /// Merge another usage into this one.
    ///
    /// Totals always accumulate. A single non-empty call is appended to the
    /// per-call breakdown; an aggregate that carries its own breakdown
    /// contributes its entries; an aggregate without one only adds totals.
    pub fn add(&mut self, other: &Usage) {
        self.requests += other.requests;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        self.input_tokens_details.cached_tokens += other.input_tokens_details.cached_tokens;
        self.output_tokens_details.reasoning_tokens +=
            other.output_tokens_details.reasoning_tokens;

        if other.requests == 1 && other.total_tokens > 0 {
            self.request_usage_entries.push(other.as_request_usage());
        } else if !other.request_usage_entries.is_empty() {
            self.request_usage_entries
                .extend(other.request_usage_entries.iter().cloned());
        }

        if let Some(cost) = other.cost {
            *self.cost.get_or_insert(0.0) += cost;
        }
    }

    fn as_request_usage(&self) -> RequestUsage {
        RequestUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.total_tokens,
            input_tokens_details: self.input_tokens_details,
            output_tokens_details: self.output_tokens_details,
        }
    }
}
