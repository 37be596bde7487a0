//! Tree copy helpers shared by the file materializer and the committer.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{ForgeError, Result};

/// How [`copy_tree`] treats symbolic links found in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Links {
    /// Copy the linked file's content as a regular file. Links to
    /// directories are rejected.
    Dereference,
    /// Recreate the link itself (unix; copied as content elsewhere)
    Preserve,
}

/// Copy one regular file, carrying its permission bits over.
///
/// A symbolic link already sitting at `dst` is replaced, never written through.
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| ForgeError::io_at(parent, e))?;
    }
    if is_symlink(dst) {
        fs::remove_file(dst).map_err(|e| ForgeError::io_at(dst, e))?;
    }
    fs::copy(src, dst).map_err(|e| ForgeError::io_at(src, e))?;
    let permissions = fs::metadata(src)
        .map_err(|e| ForgeError::io_at(src, e))?
        .permissions();
    fs::set_permissions(dst, permissions).map_err(|e| ForgeError::io_at(dst, e))?;
    Ok(())
}

/// Copy everything below `src` into `dst`, keeping relative paths.
///
/// `dst` itself must already exist and keeps its own permissions. Nested
/// directories get the source's permission bits once their contents are in
/// place, so read-only directories do not block the copy. Returns the number
/// of non-directory entries copied.
///
/// Existing symbolic links under `dst` are never followed: a directory entry
/// that would land on one is an error, a file entry replaces it.
pub fn copy_tree(src: &Path, dst: &Path, links: Links) -> Result<usize> {
    let mut directories: Vec<(PathBuf, fs::Permissions)> = Vec::new();
    let mut copied = 0;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| walk_error(src, e))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| ForgeError::validation(format!(
                "{} escaped copy root {}",
                entry.path().display(),
                src.display()
            )))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if is_symlink(&target) {
                return Err(ForgeError::validation(format!(
                    "{} is a symbolic link; refusing to copy a directory through it",
                    target.display()
                )));
            }
            fs::create_dir_all(&target).map_err(|e| ForgeError::io_at(&target, e))?;
            let permissions = entry
                .metadata()
                .map_err(|e| walk_error(entry.path(), e))?
                .permissions();
            directories.push((target, permissions));
        } else if file_type.is_symlink() {
            match links {
                Links::Preserve => copy_symlink(entry.path(), &target)?,
                Links::Dereference => copy_link_content(entry.path(), &target)?,
            }
            copied += 1;
        } else {
            copy_file(entry.path(), &target)?;
            copied += 1;
        }
    }

    // Deepest first, so a read-only parent is locked only after its children
    for (dir, permissions) in directories.into_iter().rev() {
        fs::set_permissions(&dir, permissions).map_err(|e| ForgeError::io_at(&dir, e))?;
    }

    debug!(src = %src.display(), dst = %dst.display(), copied, "copied tree");
    Ok(copied)
}

/// Whether `path` itself is a symbolic link (without following it)
pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink())
}

/// Whether `dir` contains no entries
pub fn is_dir_empty(dir: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(dir).map_err(|e| ForgeError::io_at(dir, e))?;
    Ok(entries.next().is_none())
}

fn copy_link_content(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::metadata(src).map_err(|e| ForgeError::io_at(src, e))?;
    if meta.is_dir() {
        return Err(ForgeError::validation(format!(
            "{} links to a directory; only links to files can be copied",
            src.display()
        )));
    }
    copy_file(src, dst)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src).map_err(|e| ForgeError::io_at(src, e))?;
    if fs::symlink_metadata(dst).is_ok() {
        fs::remove_file(dst).map_err(|e| ForgeError::io_at(dst, e))?;
    }
    std::os::unix::fs::symlink(&link, dst).map_err(|e| ForgeError::io_at(dst, e))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        fs::create_dir_all(dst).map_err(|e| ForgeError::io_at(dst, e))?;
        copy_tree(src, dst, Links::Preserve).map(|_| ())
    } else {
        copy_file(src, dst)
    }
}

fn walk_error(root: &Path, err: walkdir::Error) -> ForgeError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
    let source = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::other("filesystem loop while walking directory"));
    ForgeError::io_at(path, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_tree_keeps_structure() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("a/b")).unwrap();
        fs::write(src.path().join("top.txt"), "top").unwrap();
        fs::write(src.path().join("a/b/deep.txt"), "deep").unwrap();
        fs::create_dir(src.path().join("empty")).unwrap();

        let copied = copy_tree(src.path(), dst.path(), Links::Preserve).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(fs::read_to_string(dst.path().join("top.txt")).unwrap(), "top");
        assert_eq!(
            fs::read_to_string(dst.path().join("a/b/deep.txt")).unwrap(),
            "deep"
        );
        assert!(dst.path().join("empty").is_dir());
    }

    #[test]
    fn test_is_dir_empty() {
        let dir = TempDir::new().unwrap();
        assert!(is_dir_empty(dir.path()).unwrap());
        fs::write(dir.path().join("f"), "").unwrap();
        assert!(!is_dir_empty(dir.path()).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_file_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let src = dir.path().join("run.sh");
        fs::write(&src, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o751)).unwrap();

        let dst = dir.path().join("out/run.sh");
        copy_file(&src, &dst).unwrap();

        let mode = fs::metadata(&dst).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o751);
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_recreates_symlinks() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("real.txt"), "real").unwrap();
        std::os::unix::fs::symlink("real.txt", src.path().join("link.txt")).unwrap();

        copy_tree(src.path(), dst.path(), Links::Preserve).unwrap();

        let link = dst.path().join("link.txt");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("real.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_dereferences_file_links() {
        let outside = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let shared = outside.path().join("shared.txt");
        fs::write(&shared, "shared").unwrap();
        std::os::unix::fs::symlink(&shared, src.path().join("link.txt")).unwrap();

        copy_tree(src.path(), dst.path(), Links::Dereference).unwrap();

        let copied = dst.path().join("link.txt");
        assert!(fs::symlink_metadata(&copied).unwrap().is_file());
        assert_eq!(fs::read_to_string(&copied).unwrap(), "shared");

        // The copy is independent of the file it was read from
        fs::write(&copied, "changed").unwrap();
        assert_eq!(fs::read_to_string(&shared).unwrap(), "shared");
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_rejects_links_to_directories_when_dereferencing() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir(src.path().join("real")).unwrap();
        std::os::unix::fs::symlink("real", src.path().join("alias")).unwrap();

        let err = copy_tree(src.path(), dst.path(), Links::Dereference).unwrap_err();
        assert!(matches!(err, ForgeError::Validation(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_never_writes_through_destination_links() {
        let outside = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir(src.path().join("conf")).unwrap();
        fs::write(src.path().join("conf/app.toml"), "new").unwrap();
        std::os::unix::fs::symlink(outside.path(), dst.path().join("conf")).unwrap();

        let err = copy_tree(src.path(), dst.path(), Links::Dereference).unwrap_err();

        assert!(matches!(err, ForgeError::Validation(_)));
        assert!(!outside.path().join("app.toml").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_file_replaces_destination_link() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        let victim = outside.path().join("victim.txt");
        fs::write(&victim, "original").unwrap();
        let src = dir.path().join("README.md");
        fs::write(&src, "# readme").unwrap();
        let dst = dir.path().join("out.md");
        std::os::unix::fs::symlink(&victim, &dst).unwrap();

        copy_file(&src, &dst).unwrap();

        assert!(!fs::symlink_metadata(&dst).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&dst).unwrap(), "# readme");
        assert_eq!(fs::read_to_string(&victim).unwrap(), "original");
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_applies_directory_modes_after_contents() {
        use std::os::unix::fs::PermissionsExt;

        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let locked = src.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("inside.txt"), "x").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        copy_tree(src.path(), dst.path(), Links::Preserve).unwrap();

        let copied = dst.path().join("locked");
        assert_eq!(fs::read_to_string(copied.join("inside.txt")).unwrap(), "x");
        assert_eq!(
            fs::metadata(&copied).unwrap().permissions().mode() & 0o777,
            0o555
        );

        // Let TempDir clean up
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        fs::set_permissions(&copied, fs::Permissions::from_mode(0o755)).unwrap();
    }
}
