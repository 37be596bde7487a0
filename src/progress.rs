//! Human-readable progress feed.
//!
//! Events are informational only: nothing a sink does can influence the run.
//! Structured diagnostics go through `tracing`; this feed is what a person
//! watching the run reads.

use std::fmt;
use std::io::Write;

/// One step of visible progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Workspace allocated
    WorkspaceCreated { path: String },
    /// About to run command `index` of `total` (1-based)
    CommandStarted {
        index: usize,
        total: usize,
        command: String,
    },
    /// Interactive command replaced by its test command
    CommandSubstituted { command: String, substitute: String },
    /// Interactive command skipped in captured mode
    CommandSkipped { command: String },
    FileCopied { source: String },
    DirectoryCopied { source: String },
    Appended { target: String },
    /// Commit is about to use the non-atomic copy path
    CrossVolumeWarning,
    /// Working directory could not be moved back into the target
    CwdRestoreFailed { reason: String },
    Committed { target: String, atomic: bool },
    /// Inspection run finished; workspace left for the caller
    WorkspacePreserved { path: String },
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkspaceCreated { path } => {
                write!(f, "Working in temporary workspace: {}", path)
            }
            Self::CommandStarted {
                index,
                total,
                command,
            } => write!(f, "  [{}/{}] {}", index, total, command),
            Self::CommandSubstituted { substitute, .. } => write!(
                f,
                "  [forge test] Using test command for interactive step: {}",
                substitute
            ),
            Self::CommandSkipped { command } => write!(
                f,
                "  [forge test] Skipping interactive command: {}",
                command
            ),
            Self::FileCopied { source } => write!(f, "  ✓ Copied file: {}", source),
            Self::DirectoryCopied { source } => write!(f, "  ✓ Copied directory: {}", source),
            Self::Appended { target } => write!(f, "  ✓ Appended to: {}", target),
            Self::CrossVolumeWarning => write!(
                f,
                "  ⚠ Warning: Cross-volume commit detected - using best-effort copy instead of atomic move"
            ),
            Self::CwdRestoreFailed { reason } => write!(
                f,
                "  ⚠ Warning: could not change back to project directory: {}",
                reason
            ),
            Self::Committed {
                target,
                atomic: true,
            } => write!(f, "  ✓ Committed atomically to {}", target),
            Self::Committed {
                target,
                atomic: false,
            } => write!(f, "  ✓ Committed to {} (best-effort copy)", target),
            Self::WorkspacePreserved { path } => write!(
                f,
                "Workspace location: {}\n(Workspace will persist for inspection - delete manually when done)",
                path
            ),
        }
    }
}

/// Receiver for progress events
pub trait ProgressSink {
    fn emit(&mut self, event: Progress);
}

/// Prints every event as one line on stdout
#[derive(Debug, Default)]
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn emit(&mut self, event: Progress) {
        let mut out = std::io::stdout().lock();
        // Progress is best-effort; a closed stdout must not fail the run
        let _ = writeln!(out, "{}", event);
    }
}

/// Discards every event
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn emit(&mut self, _event: Progress) {}
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingProgress {
    pub events: Vec<Progress>,
}

impl ProgressSink for RecordingProgress {
    fn emit(&mut self, event: Progress) {
        self.events.push(event);
    }
}
