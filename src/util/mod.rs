//! Utility modules: retry, rate limiting, usage tracking, timeout.

pub mod rate_limit;
pub mod retry;
pub mod timeout;
pub mod usage;
