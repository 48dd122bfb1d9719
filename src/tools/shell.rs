//! Shell capability: pluggable executors and output normalization.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::registry::ToolSpec;
use super::types::ApprovalRequirement;
use crate::error::BatonError;
use crate::types::items::{ShellAction, ShellCall};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How one sub-command ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShellOutcome {
    Exit { exit_code: Option<i32> },
    Timeout,
}

/// Output of one sub-command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShellCommandOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub outcome: ShellOutcome,
}

/// Everything an executor produced for one shell call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ShellResult {
    pub output: Vec<ShellCommandOutput>,
    /// Executor-imposed cap; the smaller of this and the model's cap wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_length: Option<usize>,
}

/// A request handed to a [`ShellExecutor`].
#[derive(Debug, Clone)]
pub struct ShellCommandRequest {
    pub call_id: String,
    pub action: ShellAction,
}

/// Runs shell commands on behalf of the model.
#[async_trait]
pub trait ShellExecutor: Send + Sync {
    async fn execute(&self, request: &ShellCommandRequest) -> Result<ShellResult, BatonError>;
}

/// Agent capability wrapping a [`ShellExecutor`].
#[derive(Clone)]
pub struct ShellTool {
    executor: Arc<dyn ShellExecutor>,
    approval: ApprovalRequirement,
}

impl std::fmt::Debug for ShellTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellTool")
            .field("approval", &self.approval)
            .finish()
    }
}

impl ShellTool {
    pub const NAME: &'static str = "shell";

    pub fn new(executor: Arc<dyn ShellExecutor>) -> Self {
        Self {
            executor,
            approval: ApprovalRequirement::Never,
        }
    }

    pub fn with_needs_approval(mut self, approval: ApprovalRequirement) -> Self {
        self.approval = approval;
        self
    }

    pub fn needs_approval(&self) -> &ApprovalRequirement {
        &self.approval
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec::of_kind("shell", Self::NAME, "Run shell commands", serde_json::Value::Null)
    }

    /// Execute the call and normalize the outcome into one structured value.
    pub async fn run(&self, call: &ShellCall) -> Result<serde_json::Value, BatonError> {
        let request = ShellCommandRequest {
            call_id: call.call_id.clone(),
            action: call.action.clone(),
        };
        let result = self.executor.execute(&request).await?;
        let limit = match (call.action.max_output_length, result.max_output_length) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let mut rendered = render_shell_outputs(&result.output);
        if let Some(limit) = limit {
            rendered = truncate_utf8(&rendered, limit);
        }

        Ok(serde_json::json!({
            "output": rendered,
            "commands": result.output,
            "max_output_length": limit,
        }))
    }
}

/// Render sub-command outputs as one human-readable transcript.
pub fn render_shell_outputs(outputs: &[ShellCommandOutput]) -> String {
    let chunks: Vec<String> = outputs
        .iter()
        .map(|output| {
            let mut lines = Vec::new();
            if let Some(command) = &output.command {
                lines.push(format!("$ {command}"));
            }
            let stdout = output.stdout.trim_end();
            if !stdout.is_empty() {
                lines.push(stdout.to_string());
            }
            let stderr = output.stderr.trim_end();
            if !stderr.is_empty() {
                if !lines.is_empty() {
                    lines.push(String::new());
                }
                lines.push("stderr:".to_string());
                lines.push(stderr.to_string());
            }
            match &output.outcome {
                ShellOutcome::Exit {
                    exit_code: Some(code),
                } if *code != 0 => lines.push(format!("exit code: {code}")),
                ShellOutcome::Timeout => lines.push("status: timeout".to_string()),
                ShellOutcome::Exit { .. } => {}
            }
            lines.join("\n").trim().to_string()
        })
        .filter(|chunk| !chunk.is_empty())
        .collect();

    if chunks.is_empty() {
        "(no output)".to_string()
    } else {
        chunks.join("\n\n")
    }
}

pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let mut cutoff = max_bytes;
    while cutoff > 0 && !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    s[..cutoff].to_string()
}

/// Runs each command with `sh -c` on the local machine.
#[derive(Debug, Clone, Default)]
pub struct LocalShellExecutor {
    working_dir: Option<PathBuf>,
    default_timeout: Option<Duration>,
}

impl LocalShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    async fn run_one(&self, command: &str, timeout: Duration) -> Result<ShellCommandOutput, BatonError> {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(ShellCommandOutput {
                command: Some(command.to_string()),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                outcome: ShellOutcome::Exit {
                    exit_code: output.status.code(),
                },
            }),
            Ok(Err(e)) => Err(BatonError::ToolExecution {
                tool_name: ShellTool::NAME.into(),
                message: format!("{command}: {e}"),
            }),
            Err(_) => Ok(ShellCommandOutput {
                command: Some(command.to_string()),
                stdout: String::new(),
                stderr: String::new(),
                outcome: ShellOutcome::Timeout,
            }),
        }
    }
}

#[async_trait]
impl ShellExecutor for LocalShellExecutor {
    async fn execute(&self, request: &ShellCommandRequest) -> Result<ShellResult, BatonError> {
        let timeout = request
            .action
            .timeout_ms
            .map(Duration::from_millis)
            .or(self.default_timeout)
            .unwrap_or(DEFAULT_TIMEOUT);

        let mut output = Vec::with_capacity(request.action.commands.len());
        for command in &request.action.commands {
            output.push(self.run_one(command, timeout).await?);
        }
        Ok(ShellResult {
            output,
            max_output_length: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn exit(command: &str, stdout: &str, stderr: &str, code: i32) -> ShellCommandOutput {
        ShellCommandOutput {
            command: Some(command.into()),
            stdout: stdout.into(),
            stderr: stderr.into(),
            outcome: ShellOutcome::Exit {
                exit_code: Some(code),
            },
        }
    }

    #[test]
    fn renders_stdout_stderr_and_exit_codes() {
        let rendered = render_shell_outputs(&[
            exit("echo hi", "hi\n", "", 0),
            exit("ls missing", "", "No such file\n", 2),
            ShellCommandOutput {
                command: Some("sleep 99".into()),
                stdout: String::new(),
                stderr: String::new(),
                outcome: ShellOutcome::Timeout,
            },
        ]);

        assert_eq!(
            rendered,
            "$ echo hi\nhi\n\n$ ls missing\n\nstderr:\nNo such file\nexit code: 2\n\n$ sleep 99\nstatus: timeout"
        );
    }

    #[test]
    fn empty_output_renders_placeholder() {
        let output = ShellCommandOutput {
            command: None,
            stdout: String::new(),
            stderr: String::new(),
            outcome: ShellOutcome::Exit { exit_code: Some(0) },
        };
        assert_eq!(render_shell_outputs(&[output]), "(no output)");
        assert_eq!(render_shell_outputs(&[]), "(no output)");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_utf8("héllo", 2), "h");
        assert_eq!(truncate_utf8("abc", 10), "abc");
    }

    #[tokio::test]
    async fn local_executor_runs_in_working_dir() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        std::fs::write(dir.path().join("marker.txt"), "x").expect("marker should be written");
        let tool = ShellTool::new(Arc::new(LocalShellExecutor::new().with_working_dir(dir.path())));

        let value = tool
            .run(&ShellCall {
                call_id: "call_1".into(),
                action: ShellAction {
                    commands: vec!["ls".into(), "exit 3".into()],
                    timeout_ms: None,
                    max_output_length: None,
                },
            })
            .await
            .expect("shell call should succeed");

        let rendered = value["output"].as_str().expect("rendered output should be text");
        assert!(rendered.contains("marker.txt"));
        assert!(rendered.contains("exit code: 3"));
        assert_eq!(value["commands"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn local_executor_reports_timeouts() {
        let tool = ShellTool::new(Arc::new(LocalShellExecutor::new()));

        let value = tool
            .run(&ShellCall {
                call_id: "call_1".into(),
                action: ShellAction {
                    commands: vec!["sleep 5".into()],
                    timeout_ms: Some(50),
                    max_output_length: Some(1000),
                },
            })
            .await
            .expect("timed out command should still produce output");

        assert!(value["output"]
            .as_str()
            .is_some_and(|out| out.ends_with("status: timeout")));
    }
}
