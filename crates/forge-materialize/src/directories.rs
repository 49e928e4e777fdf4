//! Dynamic (opaque) output directory preparation.
//!
//! A pip that owns an opaque directory gets a clean slate unless the pip
//! preserves its own outputs: everything not declared as one of its
//! outputs this run is deleted, and the root itself is guaranteed to
//! exist (even if empty) afterward.

use std::collections::HashSet;
use std::path::Path;

use forge_types::{DirectoryArtifact, FileArtifact};
use fs_err as fs;

use crate::error::MaterializeError;

/// Recursively clear `dir`'s root, preserving `declared_contents` (files
/// this run is about to place there, per the reverse `path → isDirectory`
/// mapping built from this batch's inputs), then guarantee the root
/// directory exists.
///
/// When `preserve_existing_outputs` is set the whole deletion is skipped,
/// though a file colliding with the directory root is still removed so
/// the root can be created as a directory.
pub fn prepare_opaque_directory(
    dir: &DirectoryArtifact,
    declared_contents: &[FileArtifact],
    preserve_existing_outputs: bool,
) -> Result<(), MaterializeError> {
    let root = dir.path.as_path();

    if preserve_existing_outputs {
        return ensure_root_is_a_directory(root);
    }

    if root.exists() {
        let preserve: HashSet<_> = declared_contents
            .iter()
            .map(|f| f.path.as_path().to_path_buf())
            .collect();
        forge_fs::remove_tree_except(root, &preserve).map_err(|source| MaterializeError::DirectoryPrepFailed {
            path: root.display().to_string(),
            message: source.to_string(),
        })?;
    }

    ensure_root_is_a_directory(root)
}

fn ensure_root_is_a_directory(root: &Path) -> Result<(), MaterializeError> {
    if root.is_file() || root.is_symlink() {
        fs::remove_file(root).map_err(|source| MaterializeError::DirectoryPrepFailed {
            path: root.display().to_string(),
            message: source.to_string(),
        })?;
    }
    forge_fs::mkdir_p(root).map_err(|source| MaterializeError::DirectoryPrepFailed {
        path: root.display().to_string(),
        message: source.to_string(),
    })
}
