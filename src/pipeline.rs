//! Staging-and-commit pipeline.
//!
//! Drives one run: workspace → commands → copies → appends → commit. Every
//! stage is gated on the previous one through [`RunContext`], so a failure
//! anywhere stops everything after it.
//!
//! # Workspace Disposal
//!
//! The decision is made in exactly one place, [`Pipeline::dispose`]:
//!
//! | run outcome                  | `RemoveOnFailure` | `Preserve` |
//! |------------------------------|-------------------|------------|
//! | failure before commit        | removed           | kept       |
//! | commit failure               | kept              | kept       |
//! | atomic commit                | consumed (renamed)| consumed   |
//! | copy commit                  | removed           | removed    |
//! | inspection run finished      | kept              | kept       |
//!
//! # Workspace Placement
//!
//! Unless a base directory is configured, a materializing run stages beside
//! the target (in its nearest existing parent) so the commit stays on one
//! volume and can be a rename. Inspection runs use the system temp directory.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::commit::{CommitOutcome, Committer};
use crate::config::{CleanupPolicy, RunConfig};
use crate::error::{ForgeError, Result};
use crate::executor::{CommandSequence, Executor, StepOutcome};
use crate::fileops::FileMaterializer;
use crate::fsutil;
use crate::progress::{Progress, ProgressSink};
use crate::run_state::{RunContext, RunStage};
use crate::template::Template;
use crate::workspace::Workspace;

/// Summary of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Where the workspace was staged. After an atomic commit this path no
    /// longer exists; after an inspection run it is left for the caller.
    pub workspace: PathBuf,
    /// One entry per template command, in order
    pub steps: Vec<StepOutcome>,
    /// None for inspection runs
    pub commit: Option<CommitOutcome>,
    pub stages: Vec<RunStage>,
}

/// One template, one run configuration
#[derive(Debug)]
pub struct Pipeline<'a> {
    template: &'a Template,
    template_root: PathBuf,
    config: RunConfig,
    committer: Committer,
}

impl<'a> Pipeline<'a> {
    /// `template_root` is the directory the template's relative paths resolve against
    pub fn new(template: &'a Template, template_root: impl Into<PathBuf>, config: RunConfig) -> Self {
        Self {
            template,
            template_root: template_root.into(),
            config,
            committer: Committer::new(),
        }
    }

    pub fn with_committer(mut self, committer: Committer) -> Self {
        self.committer = committer;
        self
    }

    /// Run every stage and commit the result into `target`
    pub fn materialize(&self, target: &Path, progress: &mut dyn ProgressSink) -> Result<RunReport> {
        let target = std::path::absolute(target).map_err(|e| ForgeError::io_at(target, e))?;
        self.template.validate()?;
        let base = self.workspace_base(Some(&target))?;
        self.check_target(&target, &base)?;

        let mut ctx = RunContext::new();
        let mut workspace = self.open_workspace(&mut ctx, &base, progress)?;

        let result = self.build(&mut ctx, &workspace, progress).and_then(|steps| {
            ctx.transition_to(RunStage::Committing)?;
            let outcome = self.committer.commit(workspace.path(), &target, progress)?;
            ctx.advance()?;
            Ok((steps, outcome))
        });

        match result {
            Ok((steps, outcome)) => {
                if outcome == CommitOutcome::Atomic {
                    workspace.mark_consumed();
                }
                // Copy commits leave the workspace behind; the project is already in place
                if let Err(e) = workspace.cleanup() {
                    warn!(error = %e, "committed, but the workspace could not be removed");
                }
                info!(target_dir = %target.display(), ?outcome, "run completed");
                Ok(RunReport {
                    workspace: workspace.path().to_path_buf(),
                    steps,
                    commit: Some(outcome),
                    stages: ctx.history().to_vec(),
                })
            }
            Err(e) => Err(self.dispose(&mut ctx, &mut workspace, e, progress)),
        }
    }

    /// Run every stage except commit and hand the workspace back
    pub fn inspect(&self, progress: &mut dyn ProgressSink) -> Result<RunReport> {
        self.template.validate()?;
        let base = self.workspace_base(None)?;

        let mut ctx = RunContext::new();
        let mut workspace = self.open_workspace(&mut ctx, &base, progress)?;

        let result = self.build(&mut ctx, &workspace, progress).and_then(|steps| {
            ctx.finish_without_commit()?;
            Ok(steps)
        });

        match result {
            Ok(steps) => {
                let path = workspace.preserve();
                progress.emit(Progress::WorkspacePreserved {
                    path: path.display().to_string(),
                });
                Ok(RunReport {
                    workspace: path,
                    steps,
                    commit: None,
                    stages: ctx.history().to_vec(),
                })
            }
            Err(e) => Err(self.dispose(&mut ctx, &mut workspace, e, progress)),
        }
    }

    /// Where the workspace goes: the configured base, else beside the target
    /// so the commit can be a rename, else the system temp directory
    fn workspace_base(&self, target: Option<&Path>) -> Result<PathBuf> {
        if let Some(base) = &self.config.workspace_base {
            return std::path::absolute(base).map_err(|e| ForgeError::io_at(base, e));
        }
        Ok(target
            .and_then(Path::parent)
            .and_then(|parent| parent.ancestors().find(|dir| dir.is_dir()))
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir))
    }

    fn open_workspace(
        &self,
        ctx: &mut RunContext,
        base: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<Workspace> {
        ctx.advance()?;
        let created = Workspace::create_in(base).or_else(|e| {
            // An explicit base is honoured or fails; the implicit one may fall back
            if self.config.workspace_base.is_some() {
                return Err(e);
            }
            debug!(base = %base.display(), error = %e, "staging in the system temp directory instead");
            Workspace::create()
        });
        match created {
            Ok(workspace) => {
                progress.emit(Progress::WorkspaceCreated {
                    path: workspace.path().display().to_string(),
                });
                Ok(workspace)
            }
            Err(e) => {
                ctx.fail()?;
                Err(e)
            }
        }
    }

    /// Commands, then copies, then appends
    fn build(
        &self,
        ctx: &mut RunContext,
        workspace: &Workspace,
        progress: &mut dyn ProgressSink,
    ) -> Result<Vec<StepOutcome>> {
        ctx.advance()?;
        let executor = Executor::new(workspace.path(), self.config.executor);
        let steps = CommandSequence::new(&self.template.commands).run(&executor, progress)?;

        let files = FileMaterializer::new(&self.template_root, workspace.path());
        ctx.advance()?;
        files.copy(&self.template.files.copy, progress)?;

        ctx.advance()?;
        files.apply_appends(&self.template.files.append, progress)?;
        Ok(steps)
    }

    /// The single place a failed run's workspace is kept or removed
    fn dispose(
        &self,
        ctx: &mut RunContext,
        workspace: &mut Workspace,
        err: ForgeError,
        progress: &mut dyn ProgressSink,
    ) -> ForgeError {
        let stage = ctx.current_stage();
        if let Err(e) = ctx.fail() {
            warn!(error = %e, "run context already terminal");
        }
        error!(%stage, error = %err, "run failed");

        let keep = self.config.cleanup == CleanupPolicy::Preserve || err.preserves_workspace();
        if keep {
            let path = workspace.preserve();
            progress.emit(Progress::WorkspacePreserved {
                path: path.display().to_string(),
            });
        } else if let Err(cleanup) = workspace.cleanup() {
            warn!(error = %cleanup, workspace = %workspace.path().display(), "failed to remove workspace");
        }
        err
    }

    /// Reject targets that could never be committed, before any work is done
    fn check_target(&self, target: &Path, base: &Path) -> Result<()> {
        if target.exists() {
            if !target.is_dir() {
                return Err(ForgeError::validation(format!(
                    "target path {} exists but is not a directory",
                    target.display()
                )));
            }
            if !fsutil::is_dir_empty(target)? {
                return Err(ForgeError::validation(format!(
                    "target directory {} is not empty",
                    target.display()
                )));
            }
        }

        if base.starts_with(target) {
            return Err(ForgeError::validation(format!(
                "workspace directory {} would be inside target {}",
                base.display(),
                target.display()
            )));
        }
        Ok(())
    }
}
