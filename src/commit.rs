//! Promotion of a finished workspace into the target directory.
//!
//! # Paths
//!
//! - **Same volume**: the (empty) target is removed and the workspace is
//!   renamed into its place in one step. Observers see the target absent, then
//!   complete.
//! - **Cross volume**: rename is impossible, so the workspace's contents are
//!   copied file by file. A crash mid-copy can leave a partially populated
//!   target; the caller is warned before the copy starts.
//!
//! # Preconditions
//!
//! The target must be absent or an empty directory. This is checked before
//! anything is touched, so a rejected commit leaves both sides as they were.
//!
//! Any commit failure leaves the workspace on disk for manual recovery.
//!
//! # Permissions
//!
//! A renamed workspace keeps its own mode. When the target already existed,
//! its previous mode is reapplied; a newly created target keeps the
//! workspace's owner-only (0700 on unix) mode.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ForgeError, Result};
use crate::fsutil::{self, Links};
use crate::progress::{Progress, ProgressSink};

/// Which commit path was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Workspace renamed into place; it no longer exists at its old path
    Atomic,
    /// Contents copied; the workspace is still on disk
    Copied,
}

/// Decides whether two paths share a storage volume
pub trait VolumeProbe {
    /// `target` may not exist yet
    fn same_volume(&self, workspace: &Path, target: &Path) -> Result<bool>;
}

/// Compares the filesystem the workspace lives on with the target's
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceProbe;

impl VolumeProbe for DeviceProbe {
    #[cfg(unix)]
    fn same_volume(&self, workspace: &Path, target: &Path) -> Result<bool> {
        use std::os::unix::fs::MetadataExt;

        let anchor = nearest_existing(target)?;
        let ws_dev = fs::metadata(workspace)
            .map_err(|e| ForgeError::io_at(workspace, e))?
            .dev();
        let target_dev = fs::metadata(&anchor)
            .map_err(|e| ForgeError::io_at(&anchor, e))?
            .dev();
        Ok(ws_dev == target_dev)
    }

    #[cfg(windows)]
    fn same_volume(&self, workspace: &Path, target: &Path) -> Result<bool> {
        use std::path::Component;

        fn prefix(path: &Path) -> Option<std::ffi::OsString> {
            match path.components().next() {
                Some(Component::Prefix(p)) => Some(p.as_os_str().to_ascii_uppercase()),
                _ => None,
            }
        }
        let ws = std::path::absolute(workspace).map_err(|e| ForgeError::io_at(workspace, e))?;
        let tgt = std::path::absolute(target).map_err(|e| ForgeError::io_at(target, e))?;
        Ok(matches!((prefix(&ws), prefix(&tgt)), (Some(a), Some(b)) if a == b))
    }

    #[cfg(not(any(unix, windows)))]
    fn same_volume(&self, _workspace: &Path, _target: &Path) -> Result<bool> {
        Ok(false)
    }
}

/// Working-directory handling around directory replacement.
///
/// Some platforms refuse to remove or rename a directory that is a process's
/// current directory.
pub trait CwdHook {
    /// Called before `target` is removed. Returns `true` if the working
    /// directory was moved away and should be restored afterwards.
    fn before_replace(&self, target: &Path) -> Result<bool>;

    /// Best-effort move back into the newly placed `target`
    fn after_replace(&self, target: &Path) -> io::Result<()>;
}

/// For platforms without the restriction
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCwd;

impl CwdHook for NoopCwd {
    fn before_replace(&self, _target: &Path) -> Result<bool> {
        Ok(false)
    }

    fn after_replace(&self, _target: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// Steps out to the target's parent when the working directory is inside it
#[derive(Debug, Default, Clone, Copy)]
pub struct RelocatingCwd;

impl CwdHook for RelocatingCwd {
    fn before_replace(&self, target: &Path) -> Result<bool> {
        let cwd = std::env::current_dir()?;
        let cwd = cwd.canonicalize().unwrap_or(cwd);
        let target = target
            .canonicalize()
            .map_err(|e| ForgeError::io_at(target, e))?;

        if !cwd.starts_with(&target) {
            return Ok(false);
        }
        let parent = target.parent().ok_or_else(|| {
            ForgeError::commit(
                format!("target {} has no parent directory", target.display()),
                &target,
            )
        })?;
        std::env::set_current_dir(parent).map_err(|e| ForgeError::io_at(parent, e))?;
        debug!(from = %cwd.display(), to = %parent.display(), "moved working directory out of target");
        Ok(true)
    }

    fn after_replace(&self, target: &Path) -> io::Result<()> {
        std::env::set_current_dir(target)
    }
}

/// The hook appropriate for the compile target
pub fn platform_cwd_hook() -> Box<dyn CwdHook> {
    if cfg!(windows) {
        Box::new(RelocatingCwd)
    } else {
        Box::new(NoopCwd)
    }
}

/// Moves a workspace into its target directory
pub struct Committer {
    probe: Box<dyn VolumeProbe>,
    cwd: Box<dyn CwdHook>,
}

impl Default for Committer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Committer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Committer").finish_non_exhaustive()
    }
}

impl Committer {
    /// Device-based volume detection and the platform's cwd hook
    pub fn new() -> Self {
        Self {
            probe: Box::new(DeviceProbe),
            cwd: platform_cwd_hook(),
        }
    }

    pub fn with_probe(mut self, probe: Box<dyn VolumeProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_cwd_hook(mut self, cwd: Box<dyn CwdHook>) -> Self {
        self.cwd = cwd;
        self
    }

    /// Promote `workspace` into `target`
    pub fn commit(
        &self,
        workspace: &Path,
        target: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<CommitOutcome> {
        let target = absolute(target).map_err(|e| {
            ForgeError::commit(format!("could not resolve target: {}", e), workspace)
        })?;
        let resolved = target.canonicalize().unwrap_or_else(|_| target.clone());

        if workspace.starts_with(&target) || workspace.starts_with(&resolved) {
            return Err(ForgeError::commit(
                format!(
                    "workspace {} lies inside target {}",
                    workspace.display(),
                    target.display()
                ),
                workspace,
            ));
        }

        let existing = inspect_target(workspace, &target)?;
        let same_volume = self.probe.same_volume(workspace, &target).map_err(|e| {
            ForgeError::commit(format!("could not compare volumes: {}", e), workspace)
        })?;
        info!(
            target_dir = %target.display(),
            exists = existing.is_some(),
            same_volume,
            "committing workspace"
        );

        let outcome = if same_volume {
            self.commit_atomic(workspace, &target, existing, progress)?
        } else {
            commit_by_copy(workspace, &target, existing.is_some(), progress)?
        };

        progress.emit(Progress::Committed {
            target: target.display().to_string(),
            atomic: outcome == CommitOutcome::Atomic,
        });
        Ok(outcome)
    }

    fn commit_atomic(
        &self,
        workspace: &Path,
        target: &Path,
        existing: Option<fs::Permissions>,
        progress: &mut dyn ProgressSink,
    ) -> Result<CommitOutcome> {
        let relocated = match existing {
            Some(_) => self.cwd.before_replace(target).map_err(|e| {
                ForgeError::commit(
                    format!("failed to leave target before replacing it: {}", e),
                    workspace,
                )
            })?,
            None => false,
        };

        if existing.is_some() {
            if let Err(e) = fs::remove_dir(target) {
                self.restore_cwd(relocated, target, progress);
                return Err(ForgeError::commit(
                    format!("failed to remove empty target directory: {}", e),
                    workspace,
                ));
            }
        } else if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ForgeError::commit(
                    format!("failed to create {}: {}", parent.display(), e),
                    workspace,
                )
            })?;
        }

        if let Err(e) = fs::rename(workspace, target) {
            if existing.is_some() {
                // Put the empty target back so it is left as found
                if let Err(recreate) = fs::create_dir(target) {
                    warn!(target_dir = %target.display(), error = %recreate, "could not recreate empty target");
                }
            }
            self.restore_cwd(relocated, target, progress);
            return Err(ForgeError::commit(
                format!("failed to move workspace to target: {}", e),
                workspace,
            ));
        }

        if let Some(permissions) = existing {
            if let Err(e) = fs::set_permissions(target, permissions) {
                warn!(target_dir = %target.display(), error = %e, "could not reapply target permissions");
            }
        }
        self.restore_cwd(relocated, target, progress);
        info!(target_dir = %target.display(), "committed atomically");
        Ok(CommitOutcome::Atomic)
    }

    fn restore_cwd(&self, relocated: bool, target: &Path, progress: &mut dyn ProgressSink) {
        if !relocated {
            return;
        }
        if let Err(e) = self.cwd.after_replace(target) {
            warn!(target_dir = %target.display(), error = %e, "could not restore working directory");
            progress.emit(Progress::CwdRestoreFailed {
                reason: e.to_string(),
            });
        }
    }
}

fn commit_by_copy(
    workspace: &Path,
    target: &Path,
    exists: bool,
    progress: &mut dyn ProgressSink,
) -> Result<CommitOutcome> {
    warn!(target_dir = %target.display(), "cross-volume commit, falling back to best-effort copy");
    progress.emit(Progress::CrossVolumeWarning);

    if !exists {
        fs::create_dir_all(target).map_err(|e| {
            ForgeError::commit(
                format!("failed to create target directory: {}", e),
                workspace,
            )
        })?;
    }

    fsutil::copy_tree(workspace, target, Links::Preserve).map_err(|e| {
        ForgeError::commit(
            format!("failed to copy workspace contents: {}", e),
            workspace,
        )
    })?;
    info!(target_dir = %target.display(), "committed by copy");
    Ok(CommitOutcome::Copied)
}

/// Validate the target; returns its permissions if it exists
fn inspect_target(workspace: &Path, target: &Path) -> Result<Option<fs::Permissions>> {
    match fs::metadata(target) {
        Ok(meta) if !meta.is_dir() => Err(ForgeError::commit(
            format!("target path {} exists but is not a directory", target.display()),
            workspace,
        )),
        Ok(meta) => {
            let empty = fsutil::is_dir_empty(target).map_err(|e| {
                ForgeError::commit(
                    format!("failed to check if target directory is empty: {}", e),
                    workspace,
                )
            })?;
            if !empty {
                return Err(ForgeError::commit(
                    format!("target directory {} is not empty", target.display()),
                    workspace,
                ));
            }
            Ok(Some(meta.permissions()))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ForgeError::commit(
            format!("failed to inspect target {}: {}", target.display(), e),
            workspace,
        )),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| ForgeError::io_at(path, e))
}

/// Closest ancestor of `path` (itself included) that exists
#[cfg_attr(not(unix), allow(dead_code))]
fn nearest_existing(path: &Path) -> Result<PathBuf> {
    let mut current = absolute(path)?;
    loop {
        if current.exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(ForgeError::io_at(
                path,
                io::Error::new(io::ErrorKind::NotFound, "no existing ancestor"),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::RecordingProgress;
    use tempfile::TempDir;

    struct AssumeVolume(bool);

    impl VolumeProbe for AssumeVolume {
        fn same_volume(&self, _workspace: &Path, _target: &Path) -> Result<bool> {
            Ok(self.0)
        }
    }

    fn workspace_with_file(root: &Path) -> PathBuf {
        let ws = root.join("ws");
        fs::create_dir_all(ws.join("src")).unwrap();
        fs::write(ws.join("src/main.rs"), "fn main() {}\n").unwrap();
        ws
    }

    #[test]
    fn test_commit_into_missing_target_renames() {
        let root = TempDir::new().unwrap();
        let ws = workspace_with_file(root.path());
        let target = root.path().join("project");
        let mut progress = RecordingProgress::default();

        let outcome = Committer::new().commit(&ws, &target, &mut progress).unwrap();

        assert_eq!(outcome, CommitOutcome::Atomic);
        assert!(!ws.exists());
        assert_eq!(
            fs::read_to_string(target.join("src/main.rs")).unwrap(),
            "fn main() {}\n"
        );
        assert!(matches!(
            progress.events.last(),
            Some(Progress::Committed { atomic: true, .. })
        ));
    }

    #[test]
    fn test_commit_into_empty_target_replaces_it() {
        let root = TempDir::new().unwrap();
        let ws = workspace_with_file(root.path());
        let target = root.path().join("project");
        fs::create_dir(&target).unwrap();

        Committer::new()
            .commit(&ws, &target, &mut RecordingProgress::default())
            .unwrap();

        assert!(target.join("src/main.rs").is_file());
        assert!(!ws.exists());
    }

    #[test]
    fn test_failed_rename_restores_empty_target() {
        let root = TempDir::new().unwrap();
        let ws = root.path().join("vanished-workspace");
        let target = root.path().join("project");
        fs::create_dir(&target).unwrap();

        let err = Committer::new()
            .with_probe(Box::new(AssumeVolume(true)))
            .commit(&ws, &target, &mut RecordingProgress::default())
            .unwrap_err();

        assert!(matches!(err, ForgeError::Commit { .. }));
        assert!(err.preserves_workspace());
        assert!(err.to_string().contains("failed to move workspace"));
        assert!(target.is_dir());
        assert!(fsutil::is_dir_empty(&target).unwrap());
    }

    #[test]
    fn test_commit_creates_missing_parents() {
        let root = TempDir::new().unwrap();
        let ws = workspace_with_file(root.path());
        let target = root.path().join("a/b/project");

        Committer::new()
            .commit(&ws, &target, &mut RecordingProgress::default())
            .unwrap();
        assert!(target.join("src/main.rs").is_file());
    }

    #[test]
    fn test_commit_rejects_non_empty_target_without_changes() {
        let root = TempDir::new().unwrap();
        let ws = workspace_with_file(root.path());
        let target = root.path().join("project");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("existing.txt"), "existing").unwrap();

        let err = Committer::new()
            .commit(&ws, &target, &mut RecordingProgress::default())
            .unwrap_err();

        assert!(err.preserves_workspace());
        assert!(err.to_string().contains("is not empty"));
        assert_eq!(
            fs::read_to_string(ws.join("src/main.rs")).unwrap(),
            "fn main() {}\n"
        );
        assert_eq!(
            fs::read_to_string(target.join("existing.txt")).unwrap(),
            "existing"
        );
        assert_eq!(fs::read_dir(&target).unwrap().count(), 1);
    }

    #[test]
    fn test_commit_rejects_file_target() {
        let root = TempDir::new().unwrap();
        let ws = workspace_with_file(root.path());
        let target = root.path().join("project");
        fs::write(&target, "file").unwrap();

        let err = Committer::new()
            .commit(&ws, &target, &mut RecordingProgress::default())
            .unwrap_err();
        assert!(err.to_string().contains("not a directory"));
        assert!(ws.is_dir());
    }

    #[test]
    fn test_commit_rejects_workspace_inside_target() {
        let root = TempDir::new().unwrap();
        let ws = workspace_with_file(root.path());

        let err = Committer::new()
            .commit(&ws, root.path(), &mut RecordingProgress::default())
            .unwrap_err();
        assert!(err.to_string().contains("lies inside target"));
        assert!(ws.is_dir());
    }

    #[test]
    fn test_cross_volume_copies_and_warns() {
        let root = TempDir::new().unwrap();
        let ws = workspace_with_file(root.path());
        let target = root.path().join("project");
        let mut progress = RecordingProgress::default();

        let outcome = Committer::new()
            .with_probe(Box::new(AssumeVolume(false)))
            .commit(&ws, &target, &mut progress)
            .unwrap();

        assert_eq!(outcome, CommitOutcome::Copied);
        assert!(ws.join("src/main.rs").is_file());
        assert!(target.join("src/main.rs").is_file());
        assert_eq!(progress.events[0], Progress::CrossVolumeWarning);
        assert!(matches!(
            progress.events.last(),
            Some(Progress::Committed { atomic: false, .. })
        ));
    }

    #[test]
    fn test_cross_volume_into_existing_empty_target() {
        let root = TempDir::new().unwrap();
        let ws = workspace_with_file(root.path());
        let target = root.path().join("project");
        fs::create_dir(&target).unwrap();

        Committer::new()
            .with_probe(Box::new(AssumeVolume(false)))
            .commit(&ws, &target, &mut RecordingProgress::default())
            .unwrap();
        assert!(target.join("src/main.rs").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_device_probe_same_filesystem() {
        let root = TempDir::new().unwrap();
        let ws = workspace_with_file(root.path());
        let target = root.path().join("not/yet/there");
        assert!(DeviceProbe.same_volume(&ws, &target).unwrap());
    }

    #[test]
    fn test_noop_cwd_hook() {
        let root = TempDir::new().unwrap();
        assert!(!NoopCwd.before_replace(root.path()).unwrap());
        assert!(NoopCwd.after_replace(root.path()).is_ok());
    }

    #[test]
    fn test_nearest_existing_walks_up() {
        let root = TempDir::new().unwrap();
        let anchor = nearest_existing(&root.path().join("x/y/z")).unwrap();
        assert_eq!(anchor, root.path());
    }
}
