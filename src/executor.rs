//! Command execution inside the workspace.
//!
//! Commands run one at a time, in declared order, with the workspace as their
//! working directory. The first failure halts the sequence: later commands may
//! depend on the side effects of earlier ones, so nothing is ever skipped past
//! a failure and nothing is retried.
//!
//! # I/O Modes
//!
//! - [`IoMode::Attached`]: the child inherits the terminal, so prompts work.
//! - [`IoMode::Captured`]: stdin is closed and output is buffered. Interactive
//!   commands are never run as declared in this mode; see [`Resolution`].
//!
//! There is no timeout. A command that never exits blocks the run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, ExitStatus, Stdio};
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

use crate::error::{ForgeError, Result};
use crate::progress::{Progress, ProgressSink};
use crate::template::Command;

/// How spawned commands are connected to the outside world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum IoMode {
    /// Inherit the invoking terminal's stdin/stdout/stderr
    #[default]
    Attached,
    /// Close stdin and buffer stdout/stderr
    Captured,
}

/// Executor settings, fixed for the duration of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub mode: IoMode,
}

impl ExecutorConfig {
    pub fn attached() -> Self {
        Self {
            mode: IoMode::Attached,
        }
    }

    pub fn captured() -> Self {
        Self {
            mode: IoMode::Captured,
        }
    }

    /// Decide, before spawning, what to do with `cmd` under this configuration
    pub fn resolve<'a>(&self, cmd: &'a Command) -> Resolution<'a> {
        match (self.mode, cmd.interactive, cmd.test_argv.as_deref()) {
            (IoMode::Captured, true, Some(test_argv)) => Resolution::Substitute(test_argv),
            (IoMode::Captured, true, None) => Resolution::Skip,
            _ => Resolution::Run(&cmd.argv),
        }
    }
}

/// What the executor does with one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// Run the declared argument vector
    Run(&'a [String]),
    /// Interactive command in captured mode: run its replacement instead
    Substitute(&'a [String]),
    /// Interactive command in captured mode with no replacement: succeed without running
    Skip,
}

/// Per-command state in a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StepState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

/// Buffered output of a captured command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
}

/// Result of a single successful step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The command ran and exited zero; output is present in captured mode
    Succeeded { output: Option<CapturedOutput> },
    /// Interactive command skipped in captured mode
    Skipped,
}

/// Runs template commands inside a workspace
#[derive(Debug, Clone)]
pub struct Executor {
    work_dir: PathBuf,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new<P: AsRef<Path>>(work_dir: P, config: ExecutorConfig) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
            config,
        }
    }

    /// Run one command to completion.
    ///
    /// An empty argument vector fails before anything is spawned.
    pub fn run(&self, cmd: &Command, progress: &mut dyn ProgressSink) -> Result<StepOutcome> {
        if cmd.argv.first().is_none_or(|exe| exe.is_empty()) {
            return Err(ForgeError::Command {
                command: cmd.to_string(),
                reason: "empty command".to_string(),
                output: None,
            });
        }

        let argv = match self.config.resolve(cmd) {
            Resolution::Run(argv) => argv,
            Resolution::Substitute(argv) => {
                info!(command = %cmd, substitute = %argv.join(" "), "using test command for interactive step");
                progress.emit(Progress::CommandSubstituted {
                    command: cmd.to_string(),
                    substitute: argv.join(" "),
                });
                argv
            }
            Resolution::Skip => {
                warn!(command = %cmd, "skipping interactive command in captured mode");
                progress.emit(Progress::CommandSkipped {
                    command: cmd.to_string(),
                });
                return Ok(StepOutcome::Skipped);
            }
        };

        if argv.first().is_none_or(|exe| exe.is_empty()) {
            return Err(ForgeError::Command {
                command: cmd.to_string(),
                reason: "empty command".to_string(),
                output: None,
            });
        }

        match self.config.mode {
            IoMode::Attached => self.run_attached(argv),
            IoMode::Captured => self.run_captured(argv),
        }
    }

    fn build(&self, argv: &[String]) -> ProcessCommand {
        let mut process = ProcessCommand::new(&argv[0]);
        process.args(&argv[1..]).current_dir(&self.work_dir);
        process
    }

    fn run_attached(&self, argv: &[String]) -> Result<StepOutcome> {
        let command = argv.join(" ");
        debug!(%command, work_dir = %self.work_dir.display(), "spawning attached");

        let status = self
            .build(argv)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| ForgeError::Command {
                command: command.clone(),
                reason: format!("failed to spawn: {}", e),
                output: None,
            })?;

        if status.success() {
            Ok(StepOutcome::Succeeded { output: None })
        } else {
            Err(ForgeError::Command {
                command,
                reason: describe_status(status),
                output: None,
            })
        }
    }

    fn run_captured(&self, argv: &[String]) -> Result<StepOutcome> {
        let command = argv.join(" ");
        debug!(%command, work_dir = %self.work_dir.display(), "spawning captured");

        let output = self
            .build(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| ForgeError::Command {
                command: command.clone(),
                reason: format!("failed to spawn: {}", e),
                output: None,
            })?;

        let captured = CapturedOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        };

        if output.status.success() {
            Ok(StepOutcome::Succeeded {
                output: Some(captured),
            })
        } else {
            Err(ForgeError::Command {
                command,
                reason: describe_status(output.status),
                output: Some(captured),
            })
        }
    }
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Fail-fast walk over a command list.
///
/// Tracks each command's [`StepState`] so callers can see exactly where a run
/// stopped.
#[derive(Debug)]
pub struct CommandSequence<'a> {
    commands: &'a [Command],
    states: Vec<StepState>,
}

impl<'a> CommandSequence<'a> {
    pub fn new(commands: &'a [Command]) -> Self {
        Self {
            commands,
            states: vec![StepState::Idle; commands.len()],
        }
    }

    pub fn states(&self) -> &[StepState] {
        &self.states
    }

    /// Run every command in order, stopping at the first failure
    pub fn run(
        &mut self,
        executor: &Executor,
        progress: &mut dyn ProgressSink,
    ) -> Result<Vec<StepOutcome>> {
        let total = self.commands.len();
        let mut outcomes = Vec::with_capacity(total);

        for (i, cmd) in self.commands.iter().enumerate() {
            progress.emit(Progress::CommandStarted {
                index: i + 1,
                total,
                command: cmd.to_string(),
            });
            self.states[i] = StepState::Running;

            match executor.run(cmd, progress) {
                Ok(outcome) => {
                    self.states[i] = StepState::Succeeded;
                    outcomes.push(outcome);
                }
                Err(e) => {
                    self.states[i] = StepState::Failed;
                    warn!(step = i + 1, command = %cmd, "command failed, halting sequence");
                    return Err(e);
                }
            }
        }

        Ok(outcomes)
    }
}
