//! Error handling module for forge
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Every stage of the pipeline reports failures through [`ForgeError`], and
//! every kind is fatal: nothing in the pipeline retries.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::executor::CapturedOutput;
use crate::run_state::TransitionError;

/// Main error type for forge
#[derive(Error, Debug)]
pub enum ForgeError {
    /// IO errors without a more specific location
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IO errors tied to a path (workspace creation, copy, read, write)
    #[error("IO error at {}: {source}", .path.display())]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed template, missing copy source, missing append target or source
    #[error("Validation error: {0}")]
    Validation(String),

    /// A command exited non-zero or could not be spawned
    #[error("Command `{command}` failed: {reason}{}", render_output(.output))]
    Command {
        command: String,
        reason: String,
        output: Option<CapturedOutput>,
    },

    /// Promotion into the target failed; the workspace is left on disk
    #[error("Commit error: {reason} (workspace preserved at {})", .workspace.display())]
    Commit { reason: String, workspace: PathBuf },

    /// Run stage machine rejected a transition
    #[error("Run stage error: {0}")]
    Transition(#[from] TransitionError),

    /// Template manifest (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for forge operations
pub type Result<T> = std::result::Result<T, ForgeError>;

// Convenient error constructors
impl ForgeError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a commit error naming the preserved workspace
    pub fn commit(msg: impl Into<String>, workspace: impl AsRef<Path>) -> Self {
        Self::Commit {
            reason: msg.into(),
            workspace: workspace.as_ref().to_path_buf(),
        }
    }

    /// Attach a path to an IO error
    pub fn io_at(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::IoAt {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether this error leaves the workspace on disk for manual recovery
    pub fn preserves_workspace(&self) -> bool {
        matches!(self, Self::Commit { .. })
    }
}

fn render_output(output: &Option<CapturedOutput>) -> String {
    let Some(output) = output else {
        return String::new();
    };
    let mut rendered = String::new();
    if !output.stdout.trim().is_empty() {
        rendered.push_str("\n\nStdout:\n");
        rendered.push_str(output.stdout.trim_end());
    }
    if !output.stderr.trim().is_empty() {
        rendered.push_str("\n\nStderr:\n");
        rendered.push_str(output.stderr.trim_end());
    }
    rendered
}
