//! forge library
//!
//! Materializes project templates: commands run in a private workspace, files
//! are copied in, append-only patches are applied, and only then is the
//! workspace committed into the target directory.

pub mod cli;
pub mod commit;
pub mod config;
pub mod error;
pub mod executor;
pub mod fileops;
pub mod fsutil;
pub mod pipeline;
pub mod progress;
pub mod run_state;
pub mod template;
pub mod workspace;

// Re-export main types for convenience
pub use commit::{CommitOutcome, Committer, CwdHook, DeviceProbe, NoopCwd, RelocatingCwd, VolumeProbe};
pub use config::{CleanupPolicy, RunConfig};
pub use error::{ForgeError, Result};
pub use executor::{CapturedOutput, CommandSequence, Executor, ExecutorConfig, IoMode, StepOutcome};
pub use fileops::FileMaterializer;
pub use pipeline::{Pipeline, RunReport};
pub use progress::{ConsoleProgress, NullProgress, Progress, ProgressSink, RecordingProgress};
pub use run_state::{RunContext, RunStage, TransitionError};
pub use template::{AppendPatch, Command, FileOps, Template};
pub use workspace::Workspace;
