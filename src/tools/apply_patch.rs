//! File-editing capability driven by model-issued patch operations.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::registry::ToolSpec;
use super::types::ApprovalRequirement;
use crate::error::BatonError;
use crate::types::items::{ApplyPatchOperation, ApplyPatchOperationKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPatchStatus {
    #[default]
    Completed,
    Failed,
}

/// What an editor reports back for one operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ApplyPatchResult {
    #[serde(default)]
    pub status: ApplyPatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ApplyPatchResult {
    pub fn completed(output: impl Into<String>) -> Self {
        Self {
            status: ApplyPatchStatus::Completed,
            output: Some(output.into()),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            status: ApplyPatchStatus::Failed,
            output: Some(output.into()),
        }
    }
}

/// Applies file operations on behalf of the model.
#[async_trait]
pub trait ApplyPatchEditor: Send + Sync {
    async fn create_file(&self, path: &str, diff: &str) -> Result<ApplyPatchResult, BatonError>;

    async fn update_file(&self, path: &str, diff: &str) -> Result<ApplyPatchResult, BatonError>;

    async fn delete_file(&self, path: &str) -> Result<ApplyPatchResult, BatonError>;
}

/// Agent capability wrapping an [`ApplyPatchEditor`].
#[derive(Clone)]
pub struct ApplyPatchTool {
    editor: Arc<dyn ApplyPatchEditor>,
    approval: ApprovalRequirement,
}

impl std::fmt::Debug for ApplyPatchTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyPatchTool")
            .field("approval", &self.approval)
            .finish()
    }
}

impl ApplyPatchTool {
    pub const NAME: &'static str = "apply_patch";

    pub fn new(editor: Arc<dyn ApplyPatchEditor>) -> Self {
        Self {
            editor,
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
        ToolSpec::of_kind("apply_patch", Self::NAME, "Edit files", serde_json::Value::Null)
    }

    /// Apply one operation.
    ///
    /// A malformed operation is a model error; an editor failure is reported
    /// back to the model as a `failed` result.
    pub async fn run(&self, operation: &ApplyPatchOperation) -> Result<ApplyPatchResult, BatonError> {
        if operation.path.is_empty() {
            return Err(BatonError::model_behavior(
                "Apply patch operation is missing a valid path.",
            ));
        }

        let diff = match operation.kind {
            ApplyPatchOperationKind::DeleteFile => None,
            kind => match operation.diff.as_deref() {
                Some(diff) if !diff.is_empty() => Some(diff),
                _ => {
                    return Err(BatonError::model_behavior(format!(
                        "Apply patch operation {} is missing the required diff payload.",
                        kind_name(kind)
                    )))
                }
            },
        };

        let outcome = match (operation.kind, diff) {
            (ApplyPatchOperationKind::CreateFile, Some(diff)) => {
                self.editor.create_file(&operation.path, diff).await
            }
            (ApplyPatchOperationKind::UpdateFile, Some(diff)) => {
                self.editor.update_file(&operation.path, diff).await
            }
            _ => self.editor.delete_file(&operation.path).await,
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(e) if e.aborts_run() => Err(e),
            Err(e) => {
                tracing::error!(path = %operation.path, error = %e, "Apply patch editor failed");
                Ok(ApplyPatchResult::failed(e.to_string()))
            }
        }
    }
}

fn kind_name(kind: ApplyPatchOperationKind) -> &'static str {
    match kind {
        ApplyPatchOperationKind::CreateFile => "create_file",
        ApplyPatchOperationKind::UpdateFile => "update_file",
        ApplyPatchOperationKind::DeleteFile => "delete_file",
    }
}
