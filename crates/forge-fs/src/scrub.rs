use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use fs_err as fs;

/// Recursively delete everything under `root` except paths in `preserve`
/// (and the ancestors of preserved paths, which must survive for the
/// preserved file to still resolve). Returns the list of paths actually
/// removed, so the caller can emit one diagnostic per deletion.
///
/// If `root` does not exist, this is a no-op (not an error) — callers
/// (the materialization coordinator) distinguish "doesn't exist yet" from
/// "exists and needs cleaning" before calling this.
pub fn remove_tree_except(root: &Path, preserve: &HashSet<PathBuf>) -> io::Result<Vec<PathBuf>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut removed = Vec::new();
    remove_tree_except_inner(root, preserve, &mut removed)?;
    Ok(removed)
}

fn remove_tree_except_inner(
    dir: &Path,
    preserve: &HashSet<PathBuf>,
    removed: &mut Vec<PathBuf>,
) -> io::Result<()> {
    let mut children_remain = false;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if preserve.contains(&path) || is_ancestor_of_any_preserved(&path, preserve) {
            children_remain = true;
            if file_type.is_dir() && !preserve.contains(&path) {
                remove_tree_except_inner(&path, preserve, removed)?;
            }
            continue;
        }

        if file_type.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed.push(path);
    }

    if !children_remain && dir != dir.ancestors().last().unwrap_or(dir) {
        // Leave empty directories in place; callers that want the root
        // itself removed do that explicitly. This keeps the function
        // idempotent when called repeatedly against a directory that is
        // meant to persist (e.g. an opaque directory root).
    }

    Ok(())
}

fn is_ancestor_of_any_preserved(path: &Path, preserve: &HashSet<PathBuf>) -> bool {
    preserve.iter().any(|p| p.starts_with(path))
}
