//! Ephemeral staging workspace.
//!
//! Each run owns exactly one [`Workspace`]. The directory is either removed by
//! [`Workspace::cleanup`], renamed away by a commit, or handed to the caller
//! for inspection. Dropping a `Workspace` never deletes anything: removal is an
//! explicit decision made by the pipeline.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ForgeError, Result};

/// Prefix of every workspace directory name
pub const WORKSPACE_PREFIX: &str = "forge-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Active,
    Removed,
    Consumed,
    Preserved,
}

/// Uniquely named temporary directory owned by a single run
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    state: Lifecycle,
}

impl Workspace {
    /// Allocate a workspace in the system temporary directory
    pub fn create() -> Result<Self> {
        Self::create_in(std::env::temp_dir())
    }

    /// Allocate a workspace under `base`
    pub fn create_in<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref();
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(base)
            .map_err(|e| ForgeError::io_at(base, e))?;
        // Lifetime is managed by this type, not by TempDir's drop
        let path = dir.keep();
        let path = path.canonicalize().map_err(|e| ForgeError::io_at(&path, e))?;
        info!(workspace = %path.display(), "created workspace");
        Ok(Self {
            path,
            state: Lifecycle::Active,
        })
    }

    /// Absolute location of the workspace
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the directory is still owned by this run and may be written to
    pub fn is_active(&self) -> bool {
        self.state == Lifecycle::Active
    }

    /// Recursively remove the workspace.
    ///
    /// Idempotent: a second call, a call after a commit renamed the directory
    /// away, or a call after [`Workspace::preserve`] does nothing.
    pub fn cleanup(&mut self) -> Result<()> {
        if self.state != Lifecycle::Active {
            debug!(workspace = %self.path.display(), state = ?self.state, "cleanup skipped");
            return Ok(());
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => {
                debug!(workspace = %self.path.display(), "removed workspace");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(workspace = %self.path.display(), "workspace already gone");
            }
            Err(e) => return Err(ForgeError::io_at(&self.path, e)),
        }
        self.state = Lifecycle::Removed;
        Ok(())
    }

    /// Record that a commit renamed the directory into the target
    pub fn mark_consumed(&mut self) {
        self.state = Lifecycle::Consumed;
    }

    /// Keep the directory on disk and return its location.
    ///
    /// Later cleanup calls become no-ops.
    pub fn preserve(&mut self) -> PathBuf {
        if self.state == Lifecycle::Active {
            self.state = Lifecycle::Preserved;
            info!(workspace = %self.path.display(), "workspace preserved");
        }
        self.path.clone()
    }
}
