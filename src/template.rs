//! Template descriptor and manifest loading.
//!
//! A [`Template`] is the immutable input to a run: an ordered command list plus
//! the file operations applied after the commands succeed. Manifests are JSON
//! files (`template.json`) that live next to the files they reference.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{ForgeError, Result};

/// File name looked up when a template directory is given instead of a manifest
pub const MANIFEST_FILE: &str = "template.json";

/// A project template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub files: FileOps,
}

/// A single command run inside the workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Argument vector; the first element is the executable
    #[serde(rename = "cmd")]
    pub argv: Vec<String>,
    /// Whether the command expects to talk to a user
    #[serde(default)]
    pub interactive: bool,
    /// Replacement argument vector for captured (unattended) runs
    #[serde(default, rename = "test_cmd", skip_serializing_if = "Option::is_none")]
    pub test_argv: Option<Vec<String>>,
}

/// Copy and append operations, applied in that order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOps {
    /// Paths relative to the template root
    #[serde(default)]
    pub copy: Vec<String>,
    #[serde(default)]
    pub append: Vec<AppendPatch>,
}

/// Append-only patch: `source` (template root) is appended to `target` (workspace)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendPatch {
    pub target: String,
    pub source: String,
}

impl Command {
    /// Create a non-interactive command from an argument vector
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            interactive: false,
            test_argv: None,
        }
    }

    /// Mark the command interactive, optionally with a replacement for captured runs
    pub fn interactive(mut self, test_argv: Option<Vec<String>>) -> Self {
        self.interactive = true;
        self.test_argv = test_argv;
        self
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv.join(" "))
    }
}

impl AppendPatch {
    pub fn new(target: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: source.into(),
        }
    }
}

impl FileOps {
    pub fn is_empty(&self) -> bool {
        self.copy.is_empty() && self.append.is_empty()
    }
}

impl Template {
    /// Create an empty template with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            version: None,
            commands: Vec::new(),
            files: FileOps::default(),
        }
    }

    /// Returns true if the template has any file operations
    pub fn has_file_ops(&self) -> bool {
        !self.files.is_empty()
    }

    /// Parse and validate a manifest from JSON text
    pub fn parse(json: &str) -> Result<Self> {
        let template: Self = serde_json::from_str(json)?;
        template.validate()?;
        Ok(template)
    }

    /// Load and validate a manifest.
    ///
    /// `path` may be the manifest itself or a directory containing
    /// [`MANIFEST_FILE`].
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let manifest = manifest_path(path.as_ref());
        let content =
            fs::read_to_string(&manifest).map_err(|e| ForgeError::io_at(&manifest, e))?;
        tracing::debug!(manifest = %manifest.display(), "loading template manifest");
        Self::parse(&content)
    }

    /// Validate the descriptor before it is handed to the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ForgeError::validation("template name is required"));
        }

        for (i, cmd) in self.commands.iter().enumerate() {
            match cmd.argv.first() {
                None => {
                    return Err(ForgeError::validation(format!(
                        "command {}: cmd array is empty",
                        i
                    )));
                }
                Some(exe) if exe.is_empty() => {
                    return Err(ForgeError::validation(format!(
                        "command {}: first element (executable) cannot be empty",
                        i
                    )));
                }
                Some(_) => {}
            }
            if let Some(test_argv) = &cmd.test_argv {
                if test_argv.first().is_none_or(|exe| exe.is_empty()) {
                    return Err(ForgeError::validation(format!(
                        "command {}: test_cmd must name an executable",
                        i
                    )));
                }
            }
        }

        for (i, source) in self.files.copy.iter().enumerate() {
            check_relative(source)
                .map_err(|why| ForgeError::validation(format!("copy entry {}: {}", i, why)))?;
        }

        for (i, patch) in self.files.append.iter().enumerate() {
            if patch.target.is_empty() {
                return Err(ForgeError::validation(format!(
                    "append patch {}: target is required",
                    i
                )));
            }
            if patch.source.is_empty() {
                return Err(ForgeError::validation(format!(
                    "append patch {}: source is required",
                    i
                )));
            }
            check_relative(&patch.target).map_err(|why| {
                ForgeError::validation(format!("append patch {} target: {}", i, why))
            })?;
            check_relative(&patch.source).map_err(|why| {
                ForgeError::validation(format!("append patch {} source: {}", i, why))
            })?;
        }

        Ok(())
    }
}

/// Directory the template's relative paths are resolved against.
///
/// A manifest file path resolves to its parent directory.
pub fn template_root(path: &Path) -> PathBuf {
    if path.is_file() {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    } else {
        path.to_path_buf()
    }
}

fn manifest_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(MANIFEST_FILE)
    } else {
        path.to_path_buf()
    }
}

/// Template paths must stay inside their root
fn check_relative(path: &str) -> std::result::Result<(), String> {
    if path.is_empty() {
        return Err("path is empty".to_string());
    }
    let p = Path::new(path);
    for component in p.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err(format!("'{}' must be a relative path", path));
            }
            Component::ParentDir => {
                return Err(format!("'{}' must not contain '..'", path));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}
