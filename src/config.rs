//! Per-run configuration.
//!
//! Everything that used to be a process-wide toggle (interactive mode, test
//! mode) is a field here, built once per run and passed down explicitly, so
//! independent runs in one process cannot interfere.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{Display, EnumString};

use crate::executor::{ExecutorConfig, IoMode};

/// Environment variable naming the directory workspaces are created in
pub const WORKSPACE_DIR_ENV: &str = "FORGE_WORKSPACE_DIR";

/// What happens to the workspace when a run does not commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum CleanupPolicy {
    /// Ordinary runs: remove the workspace on any failure before commit.
    /// Commit failures still leave it on disk for recovery.
    RemoveOnFailure,
    /// Inspection runs: never remove, hand the path back to the caller
    Preserve,
}

/// Settings for one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub executor: ExecutorConfig,
    pub cleanup: CleanupPolicy,
    /// Directory to create the workspace in. When None, materializing runs
    /// stage beside the target and inspection runs use the system temp dir.
    #[serde(default)]
    pub workspace_base: Option<PathBuf>,
}

impl RunConfig {
    /// Materialize into a target for a user at a terminal
    pub fn materialize() -> Self {
        Self {
            executor: ExecutorConfig::attached(),
            cleanup: CleanupPolicy::RemoveOnFailure,
            workspace_base: None,
        }
    }

    /// Unattended run that stops before commit and keeps the workspace
    pub fn inspect() -> Self {
        Self {
            executor: ExecutorConfig::captured(),
            cleanup: CleanupPolicy::Preserve,
            workspace_base: None,
        }
    }

    pub fn with_mode(mut self, mode: IoMode) -> Self {
        self.executor.mode = mode;
        self
    }

    pub fn with_workspace_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.workspace_base = Some(base.into());
        self
    }

    /// Apply `FORGE_WORKSPACE_DIR` if set and non-empty
    pub fn with_env_overrides(self) -> Self {
        match std::env::var_os(WORKSPACE_DIR_ENV) {
            Some(dir) if !dir.is_empty() => self.with_workspace_base(dir),
            _ => self,
        }
    }
}
