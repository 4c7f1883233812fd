//! Deployed stack models.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the template parameter carrying the bootstrap version.
pub const BOOTSTRAP_VERSION_PARAMETER: &str = "BootstrapVersion";

/// Lifecycle status of a deployed stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StackStatus {
    /// `CREATE_IN_PROGRESS`
    CreateInProgress,
    /// `CREATE_FAILED`
    CreateFailed,
    /// `CREATE_COMPLETE`
    CreateComplete,
    /// `ROLLBACK_IN_PROGRESS`
    RollbackInProgress,
    /// `ROLLBACK_FAILED`
    RollbackFailed,
    /// `ROLLBACK_COMPLETE`
    RollbackComplete,
    /// `DELETE_IN_PROGRESS`
    DeleteInProgress,
    /// `DELETE_FAILED`
    DeleteFailed,
    /// `DELETE_COMPLETE`
    DeleteComplete,
    /// `UPDATE_IN_PROGRESS`
    UpdateInProgress,
    /// `UPDATE_COMPLETE_CLEANUP_IN_PROGRESS`
    UpdateCompleteCleanupInProgress,
    /// `UPDATE_COMPLETE`
    UpdateComplete,
    /// `UPDATE_FAILED`
    UpdateFailed,
    /// `UPDATE_ROLLBACK_IN_PROGRESS`
    UpdateRollbackInProgress,
    /// `UPDATE_ROLLBACK_FAILED`
    UpdateRollbackFailed,
    /// `UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS`
    UpdateRollbackCompleteCleanupInProgress,
    /// `UPDATE_ROLLBACK_COMPLETE`
    UpdateRollbackComplete,
    /// `REVIEW_IN_PROGRESS`
    ReviewInProgress,
    /// `IMPORT_IN_PROGRESS`
    ImportInProgress,
    /// `IMPORT_COMPLETE`
    ImportComplete,
    /// `IMPORT_ROLLBACK_IN_PROGRESS`
    ImportRollbackInProgress,
    /// `IMPORT_ROLLBACK_FAILED`
    ImportRollbackFailed,
    /// `IMPORT_ROLLBACK_COMPLETE`
    ImportRollbackComplete,
    /// Any status this crate does not know about.
    Other(String),
}

impl StackStatus {
    /// Returns the wire representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::CreateInProgress => "CREATE_IN_PROGRESS",
            Self::CreateFailed => "CREATE_FAILED",
            Self::CreateComplete => "CREATE_COMPLETE",
            Self::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            Self::RollbackFailed => "ROLLBACK_FAILED",
            Self::RollbackComplete => "ROLLBACK_COMPLETE",
            Self::DeleteInProgress => "DELETE_IN_PROGRESS",
            Self::DeleteFailed => "DELETE_FAILED",
            Self::DeleteComplete => "DELETE_COMPLETE",
            Self::UpdateInProgress => "UPDATE_IN_PROGRESS",
            Self::UpdateCompleteCleanupInProgress => "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
            Self::UpdateComplete => "UPDATE_COMPLETE",
            Self::UpdateFailed => "UPDATE_FAILED",
            Self::UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
            Self::UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
            Self::UpdateRollbackCompleteCleanupInProgress => {
                "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS"
            },
            Self::UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
            Self::ReviewInProgress => "REVIEW_IN_PROGRESS",
            Self::ImportInProgress => "IMPORT_IN_PROGRESS",
            Self::ImportComplete => "IMPORT_COMPLETE",
            Self::ImportRollbackInProgress => "IMPORT_ROLLBACK_IN_PROGRESS",
            Self::ImportRollbackFailed => "IMPORT_ROLLBACK_FAILED",
            Self::ImportRollbackComplete => "IMPORT_ROLLBACK_COMPLETE",
            Self::Other(status) => status,
        }
    }

    /// Returns `true` if a stack in this status may still reference assets.
    ///
    /// Failed creations, deletions and stacks still under review never had
    /// (or no longer have) live resources.
    #[must_use]
    pub const fn holds_live_assets(&self) -> bool {
        !matches!(
            self,
            Self::CreateFailed
                | Self::DeleteComplete
                | Self::DeleteInProgress
                | Self::DeleteFailed
                | Self::ReviewInProgress
        )
    }
}

impl FromStr for StackStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CREATE_IN_PROGRESS" => Self::CreateInProgress,
            "CREATE_FAILED" => Self::CreateFailed,
            "CREATE_COMPLETE" => Self::CreateComplete,
            "ROLLBACK_IN_PROGRESS" => Self::RollbackInProgress,
            "ROLLBACK_FAILED" => Self::RollbackFailed,
            "ROLLBACK_COMPLETE" => Self::RollbackComplete,
            "DELETE_IN_PROGRESS" => Self::DeleteInProgress,
            "DELETE_FAILED" => Self::DeleteFailed,
            "DELETE_COMPLETE" => Self::DeleteComplete,
            "UPDATE_IN_PROGRESS" => Self::UpdateInProgress,
            "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS" => Self::UpdateCompleteCleanupInProgress,
            "UPDATE_COMPLETE" => Self::UpdateComplete,
            "UPDATE_FAILED" => Self::UpdateFailed,
            "UPDATE_ROLLBACK_IN_PROGRESS" => Self::UpdateRollbackInProgress,
            "UPDATE_ROLLBACK_FAILED" => Self::UpdateRollbackFailed,
            "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS" => {
                Self::UpdateRollbackCompleteCleanupInProgress
            },
            "UPDATE_ROLLBACK_COMPLETE" => Self::UpdateRollbackComplete,
            "REVIEW_IN_PROGRESS" => Self::ReviewInProgress,
            "IMPORT_IN_PROGRESS" => Self::ImportInProgress,
            "IMPORT_COMPLETE" => Self::ImportComplete,
            "IMPORT_ROLLBACK_IN_PROGRESS" => Self::ImportRollbackInProgress,
            "IMPORT_ROLLBACK_FAILED" => Self::ImportRollbackFailed,
            "IMPORT_ROLLBACK_COMPLETE" => Self::ImportRollbackComplete,
            other => Self::Other(other.to_string()),
        })
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a stack listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSummary {
    /// Stack ARN, when the control plane returns one.
    pub stack_id: Option<String>,
    /// Stack name.
    pub stack_name: String,
    /// Current status.
    pub status: StackStatus,
}

impl StackSummary {
    /// Creates a summary without a stack id.
    #[must_use]
    pub fn new(stack_name: impl Into<String>, status: StackStatus) -> Self {
        Self {
            stack_id: None,
            stack_name: stack_name.into(),
            status,
        }
    }

    /// Sets the stack id.
    #[must_use]
    pub fn with_stack_id(mut self, stack_id: impl Into<String>) -> Self {
        self.stack_id = Some(stack_id.into());
        self
    }

    /// Identifier to address the stack with: the id when known, else the name.
    ///
    /// Ids stay unambiguous when a deleted stack's name has been reused.
    #[must_use]
    pub fn reference(&self) -> &str {
        self.stack_id.as_deref().unwrap_or(&self.stack_name)
    }
}

/// One page of a stack listing.
#[derive(Debug, Clone, Default)]
pub struct StackPage {
    /// Stacks on this page.
    pub stacks: Vec<StackSummary>,
    /// Continuation token; `None` on the last page.
    pub next_token: Option<String>,
}

/// A template parameter as reported by the template summary.
///
/// Serialized in the control plane's own field casing so rendered reference
/// blobs look like the API output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateParameter {
    /// Parameter name.
    pub parameter_key: String,
    /// Default value, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Parameter type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_type: Option<String>,
    /// Whether the value is masked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_echo: Option<bool>,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TemplateParameter {
    /// Creates a parameter with a default value.
    #[must_use]
    pub fn new(key: impl Into<String>, default_value: impl Into<String>) -> Self {
        Self {
            parameter_key: key.into(),
            default_value: Some(default_value.into()),
            parameter_type: None,
            no_echo: None,
            description: None,
        }
    }
}

/// Summary of a deployed template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateSummary {
    /// Declared parameters; `None` when the API returned none.
    pub parameters: Option<Vec<TemplateParameter>>,
}

impl TemplateSummary {
    /// Returns the qualifier encoded in the `BootstrapVersion` parameter.
    ///
    /// The default value looks like `/cdk-bootstrap/<qualifier>/version`;
    /// anything that does not split into exactly four `/` parts yields `None`.
    #[must_use]
    pub fn bootstrap_qualifier(&self) -> Option<&str> {
        let parameter = self
            .parameters
            .as_ref()?
            .iter()
            .find(|p| p.parameter_key == BOOTSTRAP_VERSION_PARAMETER)?;
        let parts: Vec<&str> = parameter.default_value.as_deref()?.split('/').collect();
        if parts.len() == 4 { Some(parts[2]) } else { None }
    }

    /// Returns `true` if the stack is known to belong to a different
    /// bootstrap qualifier than `qualifier`.
    ///
    /// Only a positive mismatch excludes a stack; unknown stays included.
    #[must_use]
    pub fn belongs_to_other_qualifier(&self, qualifier: Option<&str>) -> bool {
        match (qualifier, self.bootstrap_qualifier()) {
            (Some(ours), Some(theirs)) => !ours.is_empty() && ours != theirs,
            _ => false,
        }
    }

    /// Renders the parameter list as JSON for inclusion in a reference blob.
    #[must_use]
    pub fn parameters_json(&self) -> String {
        serde_json::to_string(&self.parameters).unwrap_or_default()
    }
}
