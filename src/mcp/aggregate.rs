//! Multi-server aggregation with deterministic tool naming.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use super::server::McpServer;
use crate::error::{BatonError, Result};
use crate::tools::arguments::ToolArguments;
use crate::tools::tool::{Tool, ToolExecutionContext};
use crate::tools::types::AgentToolParameters;

/// How tool names are exposed when servers are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum McpNamingPolicy {
    /// `{server}_{tool}` once more than one server is attached.
    #[default]
    PrefixWhenMultiple,
    /// Always `{server}_{tool}`.
    Always,
    /// Upstream names as-is. Collisions are an error.
    Never,
}

/// One server tool, exposed to the model under its aggregated name.
#[derive(Debug, Clone)]
pub struct McpTool {
    exposed_name: String,
    upstream_name: String,
    description: String,
    parameters: AgentToolParameters,
    server: Arc<McpServer>,
}

impl McpTool {
    pub fn upstream_name(&self) -> &str {
        &self.upstream_name
    }

    pub fn server_name(&self) -> &str {
        self.server.name()
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.exposed_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &AgentToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        _ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value> {
        let result = self
            .server
            .call_tool(&self.upstream_name, args.raw().clone())
            .await?;
        Ok(result.into_value_or_text())
    }
}

/// Merges the tools of several servers into one name space.
#[derive(Debug)]
pub struct McpToolAggregator {
    servers: Vec<Arc<McpServer>>,
    policy: McpNamingPolicy,
}

impl McpToolAggregator {
    pub fn new(servers: Vec<Arc<McpServer>>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(servers.len());
        for server in &servers {
            let name = server.name().trim();
            if name.is_empty() {
                return Err(BatonError::Configuration(
                    "Tool server name must not be empty".into(),
                ));
            }
            if !seen.insert(name.to_string()) {
                return Err(BatonError::Configuration(format!(
                    "Duplicate tool server name '{name}'"
                )));
            }
        }

        Ok(Self {
            servers,
            policy: McpNamingPolicy::default(),
        })
    }

    pub fn with_naming_policy(mut self, policy: McpNamingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Every tool of every server, sorted by exposed name.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let prefix = match self.policy {
            McpNamingPolicy::PrefixWhenMultiple => self.servers.len() > 1,
            McpNamingPolicy::Always => true,
            McpNamingPolicy::Never => false,
        };

        let mut origins: HashMap<String, String> = HashMap::new();
        let mut merged = Vec::new();
        for server in &self.servers {
            for schema in server.list_tools().await? {
                let exposed_name = if prefix {
                    format!("{}_{}", server.name().trim(), schema.name)
                } else {
                    schema.name.clone()
                };

                if let Some(other) = origins.insert(exposed_name.clone(), server.name().to_string()) {
                    return Err(BatonError::user(format!(
                        "Duplicate tool name '{exposed_name}' exposed by servers '{other}' and '{}'",
                        server.name()
                    )));
                }

                merged.push(McpTool {
                    exposed_name,
                    description: schema.description.clone().unwrap_or_default(),
                    parameters: AgentToolParameters::from_schema(schema.input_schema),
                    upstream_name: schema.name,
                    server: server.clone(),
                });
            }
        }

        merged.sort_by(|left, right| left.exposed_name.cmp(&right.exposed_name));
        Ok(merged)
    }
}
