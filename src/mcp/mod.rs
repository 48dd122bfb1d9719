//! Tool servers: the client contract, a caching server wrapper and multi-server aggregation.

pub mod aggregate;
#[cfg(feature = "mcp")]
pub mod client;
pub mod server;

pub use aggregate::{McpNamingPolicy, McpTool, McpToolAggregator};
#[cfg(feature = "mcp")]
pub use client::RmcpClient;
pub use server::{McpServer, RetryAttempts};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Schema for a tool exposed by a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

impl McpToolSchema {
    pub fn new(name: impl Into<String>, input_schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpPromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: Option<bool>,
}

/// A prompt template offered by a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpPrompt {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Option<Vec<McpPromptArgument>>,
}

/// Result of one server-side tool call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct McpCallResult {
    pub structured_content: Option<serde_json::Value>,
    pub text_content: Option<String>,
    pub content: Vec<serde_json::Value>,
}

impl McpCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text_content: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn structured(value: serde_json::Value) -> Self {
        Self {
            structured_content: Some(value),
            ..Self::default()
        }
    }

    pub fn into_value_or_text(self) -> serde_json::Value {
        if let Some(structured) = self.structured_content {
            return structured;
        }
        if let Some(text) = self.text_content {
            return serde_json::Value::String(text);
        }
        serde_json::Value::Array(self.content)
    }
}

/// Protocol client for one tool server.
///
/// Implementations must be safe to share across the concurrent units of a turn.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn cleanup(&self) -> Result<()>;

    async fn list_tools(&self) -> Result<Vec<McpToolSchema>>;

    async fn list_prompts(&self) -> Result<Vec<McpPrompt>>;

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<McpCallResult>;
}
