//! File materialization: copies from the template root, then append-only patches.
//!
//! # Copy Semantics
//!
//! - A directory entry is copied *into* the workspace root with its full
//!   relative structure (`files/sub/a.txt` lands at `sub/a.txt`).
//! - A file entry lands at the workspace root under its base name only
//!   (`patches/note.txt` lands at `note.txt`).
//!
//! # Append Semantics
//!
//! Patches only ever extend files that already exist in the workspace. They
//! never create, truncate or rewrite, and they are not deduplicated: the same
//! patch applied twice appends twice.
//!
//! # Symbolic Links
//!
//! Nothing here writes through a link. Template links to files are copied as
//! regular files, and an append target reached through a link (at any path
//! component) is rejected.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ForgeError, Result};
use crate::fsutil::{self, Links};
use crate::progress::{Progress, ProgressSink};
use crate::template::AppendPatch;

/// Applies a template's file operations to a workspace
#[derive(Debug, Clone)]
pub struct FileMaterializer {
    template_root: PathBuf,
    workspace: PathBuf,
}

impl FileMaterializer {
    pub fn new<T: AsRef<Path>, W: AsRef<Path>>(template_root: T, workspace: W) -> Self {
        Self {
            template_root: template_root.as_ref().to_path_buf(),
            workspace: workspace.as_ref().to_path_buf(),
        }
    }

    /// Copy each source, in order, into the workspace root.
    ///
    /// A missing source stops the copy immediately.
    pub fn copy(&self, sources: &[String], progress: &mut dyn ProgressSink) -> Result<()> {
        for source in sources {
            let abs_src = self.template_root.join(source);
            let metadata = fs::metadata(&abs_src).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ForgeError::validation(format!(
                        "copy source {} not found in template {}",
                        source,
                        self.template_root.display()
                    ))
                } else {
                    ForgeError::io_at(&abs_src, e)
                }
            })?;

            if metadata.is_dir() {
                let copied = fsutil::copy_tree(&abs_src, &self.workspace, Links::Dereference)?;
                info!(%source, copied, "copied directory into workspace");
                progress.emit(Progress::DirectoryCopied {
                    source: source.clone(),
                });
            } else {
                let file_name = abs_src.file_name().ok_or_else(|| {
                    ForgeError::validation(format!("copy source {} has no file name", source))
                })?;
                let dst = self.workspace.join(file_name);
                fsutil::copy_file(&abs_src, &dst)?;
                info!(%source, dst = %dst.display(), "copied file into workspace");
                progress.emit(Progress::FileCopied {
                    source: source.clone(),
                });
            }
        }
        Ok(())
    }

    /// Append each patch's source to its existing target, in declared order
    pub fn apply_appends(
        &self,
        patches: &[AppendPatch],
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        for patch in patches {
            self.apply_append(patch)?;
            progress.emit(Progress::Appended {
                target: patch.target.clone(),
            });
        }
        Ok(())
    }

    fn apply_append(&self, patch: &AppendPatch) -> Result<()> {
        let src = self.template_root.join(&patch.source);
        let dst = self.workspace.join(&patch.target);

        let content = fs::read(&src).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ForgeError::validation(format!("patch source {} does not exist", patch.source))
            } else {
                ForgeError::io_at(&src, e)
            }
        })?;

        self.check_append_target(patch)?;

        let mut file = open_for_append(&dst).map_err(|e| ForgeError::io_at(&dst, e))?;
        file.write_all(&content)
            .map_err(|e| ForgeError::io_at(&dst, e))?;

        debug!(patch_target = %patch.target, patch_source = %patch.source, bytes = content.len(), "appended patch");
        Ok(())
    }

    /// The target and every directory leading to it must be real entries
    /// inside the workspace, and the target a regular file
    fn check_append_target(&self, patch: &AppendPatch) -> Result<()> {
        let mut current = self.workspace.clone();
        for component in Path::new(&patch.target).components() {
            if let Component::Normal(part) = component {
                current.push(part);
            }
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    return Err(ForgeError::validation(format!(
                        "append target {} is not a regular file (symbolic link at {})",
                        patch.target,
                        current.display()
                    )));
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(ForgeError::validation(format!(
                        "append target {} does not exist (patches may only extend existing files)",
                        patch.target
                    )));
                }
                Err(e) => return Err(ForgeError::io_at(&current, e)),
            }
        }

        let meta = fs::symlink_metadata(&current).map_err(|e| ForgeError::io_at(&current, e))?;
        if !meta.is_file() {
            return Err(ForgeError::validation(format!(
                "append target {} is not a regular file",
                patch.target
            )));
        }
        Ok(())
    }
}

/// No `create`: a target that vanished since the check is an error, not a new file
#[cfg(unix)]
fn open_for_append(path: &Path) -> std::io::Result<File> {
    use nix::fcntl::OFlag;
    use std::os::unix::fs::OpenOptionsExt;

    // A link swapped in after the check fails to open instead of being followed
    OpenOptions::new()
        .append(true)
        .custom_flags(OFlag::O_NOFOLLOW.bits())
        .open(path)
}

#[cfg(not(unix))]
fn open_for_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().append(true).open(path)
}
