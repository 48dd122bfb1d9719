//! Baton: an agent run loop.
//!
//! A [`Runner`](agent_loop::Runner) drives an [`Agent`](agent::Agent) through
//! turns against a [`ModelProvider`](provider::ModelProvider). Each turn the
//! model's output is classified, tool calls run concurrently, handoffs switch
//! the active agent, and guardrails can stop the run. Calls that need a human
//! decision suspend the run; its [`RunState`](agent_loop::RunState) can be
//! serialized, approved or rejected, and resumed later.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use baton::prelude::*;
//!
//! # async fn example(provider: Arc<dyn ModelProvider>) -> baton::error::Result<()> {
//! let agent = Arc::new(Agent::new("assistant").with_instructions("Answer briefly."));
//! let result = Runner::new(provider).run(agent, "What is 2 + 2?").await?;
//! println!("{:?}", result.final_output);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod agent_loop;
pub mod config;
pub mod context;
pub mod error;
pub mod guardrail;
pub mod mcp;
pub mod prelude;
pub mod provider;
pub mod session;
pub mod tools;
pub mod trace;
pub mod types;
pub mod util;
