//! Run Stage Machine
//!
//! Authoritative record of where a run is. Each stage is a hard gate: the
//! next one can only begin after the previous one fully succeeded, and stages
//! can never be skipped or revisited.
//!
//! # Stage Flow
//!
//! ```text
//! NotStarted
//!     ↓
//! CreatingWorkspace
//!     ↓
//! ExecutingCommands
//!     ↓
//! CopyingFiles
//!     ↓
//! ApplyingPatches
//!     ↓            ↘ (inspection runs)
//! Committing        |
//!     ↓            ↙
//! Completed
//!
//! (Any non-terminal stage can transition to Failed)
//! ```

use std::fmt;
use thiserror::Error;

/// Pipeline stages in sequential order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RunStage {
    NotStarted = 0,
    CreatingWorkspace = 1,
    ExecutingCommands = 2,
    CopyingFiles = 3,
    ApplyingPatches = 4,
    /// Promoting the workspace into the target
    Committing = 5,
    /// Terminal
    Completed = 6,
    /// Terminal; the failing stage is recorded by [`RunContext`]
    Failed = 255,
}

impl RunStage {
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns the next stage in the sequence, or None at a terminal state
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::CreatingWorkspace),
            Self::CreatingWorkspace => Some(Self::ExecutingCommands),
            Self::ExecutingCommands => Some(Self::CopyingFiles),
            Self::CopyingFiles => Some(Self::ApplyingPatches),
            Self::ApplyingPatches => Some(Self::Committing),
            Self::Committing => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::CreatingWorkspace => "Creating workspace",
            Self::ExecutingCommands => "Executing commands",
            Self::CopyingFiles => "Copying files",
            Self::ApplyingPatches => "Applying patches",
            Self::Committing => "Committing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during stage transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot move from {from} to {to} (stages advance one at a time)")]
    OutOfOrder { from: RunStage, to: RunStage },

    #[error("Cannot transition from terminal stage {from}")]
    FromTerminalState { from: RunStage },

    /// Only an inspection run may finish without committing
    #[error("Cannot finish without commit from {from}")]
    NotReadyToFinish { from: RunStage },
}

/// Owns the current stage of a single run
#[derive(Debug, Clone)]
pub struct RunContext {
    current: RunStage,
    failed_at: Option<RunStage>,
    history: Vec<RunStage>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            current: RunStage::NotStarted,
            failed_at: None,
            history: Vec::with_capacity(8),
        }
    }

    #[inline]
    pub fn current_stage(&self) -> RunStage {
        self.current
    }

    /// Stage that was active when the run failed
    #[inline]
    pub fn failed_at(&self) -> Option<RunStage> {
        self.failed_at
    }

    /// Stages left behind, in order
    pub fn history(&self) -> &[RunStage] {
        &self.history
    }

    /// Move to the next stage
    pub fn advance(&mut self) -> Result<RunStage, TransitionError> {
        let next = self
            .current
            .next()
            .ok_or(TransitionError::FromTerminalState { from: self.current })?;
        self.transition_to(next)?;
        Ok(next)
    }

    /// Move to `to`, which must be the immediate successor
    pub fn transition_to(&mut self, to: RunStage) -> Result<(), TransitionError> {
        if self.current.is_terminal() {
            return Err(TransitionError::FromTerminalState { from: self.current });
        }
        if self.current.next() != Some(to) {
            return Err(TransitionError::OutOfOrder {
                from: self.current,
                to,
            });
        }
        tracing::debug!(from = %self.current, to = %to, "run stage transition");
        self.history.push(self.current);
        self.current = to;
        Ok(())
    }

    /// Inspection runs end after patches are applied, without committing
    pub fn finish_without_commit(&mut self) -> Result<(), TransitionError> {
        if self.current != RunStage::ApplyingPatches {
            return Err(TransitionError::NotReadyToFinish { from: self.current });
        }
        self.history.push(self.current);
        self.current = RunStage::Completed;
        Ok(())
    }

    /// Record a failure in the current stage
    pub fn fail(&mut self) -> Result<(), TransitionError> {
        if self.current.is_terminal() {
            return Err(TransitionError::FromTerminalState { from: self.current });
        }
        self.failed_at = Some(self.current);
        self.history.push(self.current);
        self.current = RunStage::Failed;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.current == RunStage::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.current == RunStage::Failed
    }
}
