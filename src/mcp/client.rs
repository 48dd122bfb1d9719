//! [`McpClient`] over an rmcp session.

use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParams, CallToolResult, ClientInfo, Content, JsonObject, ResourceContents},
    service::{ClientInitializeError, DynService, Peer, RoleClient, RunningService, ServiceError, ServiceExt},
    transport::TokioChildProcess,
};
use tokio::process::Command;
use tokio::sync::Mutex;

use super::{McpCallResult, McpClient, McpPrompt, McpToolSchema};
use crate::error::{BatonError, Result};

type DynClientService = Box<dyn DynService<RoleClient>>;
pub type McpRunningService = RunningService<RoleClient, DynClientService>;

enum Launch {
    Stdio { command: String, args: Vec<String> },
    Attached,
}

/// Tool-server client backed by an rmcp session.
///
/// Requests go through a cloned peer handle, so the session lock is held
/// only long enough to take the handle and calls run concurrently.
pub struct RmcpClient {
    launch: Launch,
    session: Mutex<Option<McpRunningService>>,
}

impl std::fmt::Debug for RmcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("RmcpClient");
        if let Launch::Stdio { command, args } = &self.launch {
            debug.field("command", command).field("args", args);
        }
        debug.finish()
    }
}

impl RmcpClient {
    /// Spawn a local server over stdio on [`McpClient::connect`].
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            launch: Launch::Stdio {
                command: command.into(),
                args,
            },
            session: Mutex::new(None),
        }
    }

    /// Wrap an already-running rmcp service. The handshake is already done.
    pub fn from_running_service(session: McpRunningService) -> Self {
        Self {
            launch: Launch::Attached,
            session: Mutex::new(Some(session)),
        }
    }

    async fn peer(&self) -> Result<Peer<RoleClient>> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or_else(not_connected)?;
        Ok(session.peer().clone())
    }

    /// Convert an rmcp initialization result into a client.
    pub fn from_running_service_result(
        result: std::result::Result<McpRunningService, ClientInitializeError>,
    ) -> Result<Self> {
        result
            .map(Self::from_running_service)
            .map_err(map_client_initialize_error)
    }
}

#[async_trait]
impl McpClient for RmcpClient {
    async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(existing) = session.as_ref() {
            if existing.is_closed() {
                return Err(BatonError::Stream("MCP session is closed".into()));
            }
            return Ok(());
        }

        let Launch::Stdio { command, args } = &self.launch else {
            return Err(BatonError::Configuration("Missing MCP session".into()));
        };

        let mut child = Command::new(command);
        child.args(args);
        let transport = TokioChildProcess::new(child)?;
        let running = ClientInfo::default()
            .into_dyn()
            .serve(transport)
            .await
            .map_err(map_client_initialize_error)?;
        *session = Some(running);
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        if let Some(session) = self.session.lock().await.take() {
            session.cancel().await?;
        }
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<McpToolSchema>> {
        let peer = self.peer().await?;

        let tools = match peer.list_all_tools().await {
            Ok(tools) => tools,
            Err(ServiceError::UnexpectedResponse) => {
                peer
                    .list_tools(None)
                    .await
                    .map_err(|e| map_service_error("list_tools", e))?
                    .tools
            }
            Err(e) => return Err(map_service_error("list_tools", e)),
        };

        Ok(tools.into_iter().map(map_tool_schema).collect())
    }

    async fn list_prompts(&self) -> Result<Vec<McpPrompt>> {
        let prompts = self
            .peer()
            .await?
            .list_all_prompts()
            .await
            .map_err(|e| map_service_error("list_prompts", e))?;
        prompts
            .into_iter()
            .map(|prompt| Ok(serde_json::from_value(serde_json::to_value(prompt)?)?))
            .collect()
    }

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<McpCallResult> {
        let arguments = coerce_tool_arguments(arguments)?;
        let peer = self.peer().await?;

        let result = peer
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_owned().into(),
                arguments,
                task: None,
            })
            .await
            .map_err(|e| map_service_error("call_tool", e))?;

        map_call_result(name, result)
    }
}

fn not_connected() -> BatonError {
    BatonError::InvalidState("MCP client must be connected first".into())
}

fn map_tool_schema(tool: rmcp::model::Tool) -> McpToolSchema {
    McpToolSchema {
        name: tool.name.to_string(),
        description: tool.description.map(|d| d.to_string()),
        input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
    }
}

fn coerce_tool_arguments(value: serde_json::Value) -> Result<Option<JsonObject>> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) => Ok(Some(map)),
        serde_json::Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let parsed: serde_json::Value = serde_json::from_str(trimmed).map_err(|e| {
                BatonError::InvalidArgument(format!("MCP tool arguments must be valid JSON: {e}"))
            })?;
            coerce_tool_arguments(parsed)
        }
        other => Err(BatonError::InvalidArgument(format!(
            "MCP tool arguments must be a JSON object; got {other}"
        ))),
    }
}

fn extract_text_content(content: &[Content]) -> Option<String> {
    let lines: Vec<String> = content
        .iter()
        .filter_map(|item| {
            if let Some(text) = item.as_text() {
                return Some(text.text.clone());
            }
            match &item.as_resource()?.resource {
                ResourceContents::TextResourceContents { text, .. } => Some(text.clone()),
                _ => None,
            }
        })
        .collect();

    (!lines.is_empty()).then(|| lines.join("\n"))
}

fn map_call_result(name: &str, result: CallToolResult) -> Result<McpCallResult> {
    let text_content = extract_text_content(&result.content);
    let content = result
        .content
        .iter()
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect::<Vec<_>>();

    if result.is_error.unwrap_or(false) {
        let message = result
            .structured_content
            .as_ref()
            .map(|v| v.to_string())
            .or_else(|| text_content.clone())
            .unwrap_or_else(|| "MCP tool returned an error result".into());

        return Err(BatonError::ToolExecution {
            tool_name: name.to_string(),
            message,
        });
    }

    Ok(McpCallResult {
        structured_content: result.structured_content,
        text_content,
        content,
    })
}

fn protocol_error(message: String) -> BatonError {
    BatonError::Provider {
        provider: "mcp".into(),
        message,
    }
}

fn map_client_initialize_error(error: ClientInitializeError) -> BatonError {
    match error {
        ClientInitializeError::JsonRpcError(rpc) => protocol_error(format!(
            "handshake rejected ({}): {}",
            rpc.code.0, rpc.message
        )),
        ClientInitializeError::ConnectionClosed(during) => {
            BatonError::Stream(format!("tool server hung up during handshake: {during}"))
        }
        ClientInitializeError::TransportError { error, context } => {
            BatonError::Stream(format!("handshake transport failure in {context}: {error}"))
        }
        ClientInitializeError::Cancelled => BatonError::Stream("handshake cancelled".into()),
        other => protocol_error(format!("handshake failed: {other}")),
    }
}

fn map_service_error(operation: &str, error: ServiceError) -> BatonError {
    match error {
        ServiceError::Timeout { timeout } => BatonError::Timeout(timeout.as_millis() as u64),
        ServiceError::McpError(rpc) => {
            protocol_error(format!("{operation} failed ({}): {}", rpc.code.0, rpc.message))
        }
        ServiceError::UnexpectedResponse => {
            protocol_error(format!("{operation} got a response of the wrong shape"))
        }
        ServiceError::TransportClosed => {
            BatonError::Stream(format!("{operation}: tool server connection closed"))
        }
        ServiceError::TransportSend(cause) => {
            BatonError::Stream(format!("{operation}: could not send request: {cause}"))
        }
        ServiceError::Cancelled { reason } => BatonError::Stream(match reason {
            Some(reason) => format!("{operation} cancelled: {reason}"),
            None => format!("{operation} cancelled"),
        }),
        other => protocol_error(format!("{operation} failed: {other}")),
    }
}
