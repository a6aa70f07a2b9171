use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::jobs::JobKind;

/// Error type shared by every workbench operation.
///
/// Variants follow the failure classes surfaced to users: a tool failed, a
/// prerequisite is missing, metadata is incomplete, or a patch target is
/// absent. Frontends print `classification()` next to the message.
#[derive(Debug, Error)]
pub enum WorkbenchError {
    /// External process exited non-zero. `output` holds its captured stdout/stderr.
    #[error("{tool} failed ({status}):\n{output}")]
    ToolInvocation { tool: String, status: String, output: String },

    /// External process did not finish within its timeout and was killed.
    #[error("{tool} timed out after {timeout:?}")]
    ToolTimeout { tool: String, timeout: Duration, output: String },

    /// A required tool could not be located.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A workspace, segment, firmware or file that must exist does not.
    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    /// Segment directory has no `rootfs` subtree yet.
    #[error("Segment '{0}' is not extracted (no rootfs at {1})")]
    NotExtracted(String, PathBuf),

    #[error("Workspace already exists: {0}")]
    WorkspaceExists(PathBuf),

    #[error("Unknown segment '{0}'")]
    UnknownSegment(String),

    /// Required numeric metadata field is absent.
    #[error("Metadata incomplete: {field} is missing")]
    MetadataIncomplete { field: &'static str },

    /// Derived rootfs span is zero or negative.
    #[error("Invalid rootfs span {span} (footer_offset - fs_offset - footer_size must be > 0)")]
    InvalidSpan { span: i64 },

    /// Shadow file or root entry is absent.
    #[error("Patch target missing: {0}")]
    PatchTargetMissing(String),

    #[error("Password hashing failed: {0}")]
    Hash(String),

    /// A job of the same kind is already running.
    #[error("A {0} job is already running")]
    Busy(JobKind),

    #[error("The {0} job panicked")]
    JobPanicked(JobKind),

    /// Predicted filesystem exceeds the original span and the caller did not confirm.
    #[error("Estimated filesystem exceeds the original span by {} bytes", -remaining)]
    BudgetExceeded { remaining: i64 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkbenchError {
    /// Short label for user-visible reports.
    pub fn classification(&self) -> &'static str {
        match self {
            WorkbenchError::ToolInvocation { .. }
            | WorkbenchError::ToolTimeout { .. }
            | WorkbenchError::ToolNotFound(_) => "tool-invocation",
            WorkbenchError::MissingPrerequisite(_)
            | WorkbenchError::NotExtracted(..)
            | WorkbenchError::WorkspaceExists(_)
            | WorkbenchError::UnknownSegment(_) => "missing-prerequisite",
            WorkbenchError::MetadataIncomplete { .. } | WorkbenchError::InvalidSpan { .. } => {
                "metadata-incomplete"
            }
            WorkbenchError::PatchTargetMissing(_) => "patch-target-missing",
            WorkbenchError::Busy(_) => "busy",
            WorkbenchError::Hash(_) | WorkbenchError::JobPanicked(_) => "internal",
            WorkbenchError::BudgetExceeded { .. } => "budget-exceeded",
            WorkbenchError::Config(_) => "config",
            WorkbenchError::Io(_) => "io",
        }
    }

    /// Whether retrying the same call may succeed without changing any state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkbenchError::ToolInvocation { .. }
                | WorkbenchError::ToolTimeout { .. }
                | WorkbenchError::Busy(_)
        )
    }

    /// Captured tool output, if this error came from an external process.
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            WorkbenchError::ToolInvocation { output, .. }
            | WorkbenchError::ToolTimeout { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Convenience result type for workbench operations.
pub type WorkbenchResult<T> = Result<T, WorkbenchError>;
