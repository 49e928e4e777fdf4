//! Filesystem helpers shared by the content store, materialization
//! coordinator, and historic cache: small, independently
//! testable functions rather than a single god object.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs_err as fs;

mod realize;
mod scrub;

pub use realize::{hardlink_or_copy, RealizationMode};
pub use scrub::remove_tree_except;

/// How many times [`rename_with_retry`] retries a rename that fails with a
/// transient error (file briefly locked by a virus scanner, an
/// antivirus-held handle on Windows, etc.) before giving up.
const RENAME_RETRIES: u32 = 5;

/// Iterate the subdirectories of `root`, silently yielding nothing if
/// `root` does not exist. Used by the cache pruning / bucket-removal
/// paths that need to walk "one directory per index/package" layouts.
pub fn directories(root: impl AsRef<Path>) -> impl Iterator<Item = PathBuf> {
    fs::read_dir(root.as_ref())
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|ft| ft.is_dir()))
        .map(|entry| entry.path())
}

/// Rename `from` to `to`, retrying a few times on transient failures.
/// Renames within the same filesystem are atomic, which the content
/// store and historic cache rely on for crash consistency.
pub async fn rename_with_retry(from: impl AsRef<Path>, to: impl AsRef<Path>) -> io::Result<()> {
    let from = from.as_ref();
    let to = to.as_ref();
    let mut attempt = 0;
    loop {
        match tokio::fs::rename(from, to).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < RENAME_RETRIES && is_transient(&err) => {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
            }
            Err(err) => return Err(err),
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock
    )
}

/// Atomically replace (or create) a symlink at `link` pointing to
/// `target`. Used for the cache's "archive then symlink" persistence
/// pattern.
pub fn replace_symlink(target: impl AsRef<Path>, link: impl AsRef<Path>) -> io::Result<()> {
    let link = link.as_ref();
    let parent = link.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::Builder::new()
        .prefix(".forge-symlink-")
        .tempfile_in(parent)?;
    let tmp_path = tmp.path().to_path_buf();
    // `tempfile` creates a regular file; remove it so the symlink call
    // below can claim the name.
    fs::remove_file(&tmp_path)?;

    #[cfg(unix)]
    std::os::unix::fs::symlink(target.as_ref(), &tmp_path)?;
    #[cfg(windows)]
    {
        if target.as_ref().is_dir() {
            std::os::windows::fs::symlink_dir(target.as_ref(), &tmp_path)?;
        } else {
            std::os::windows::fs::symlink_file(target.as_ref(), &tmp_path)?;
        }
    }

    fs::rename(&tmp_path, link)?;
    Ok(())
}

/// Create `dir` and all of its ancestors, tolerating the
/// already-exists case (mirrors `fs_err::create_dir_all` semantics but
/// documents the tolerance explicitly at call sites in C7).
pub fn mkdir_p(dir: impl AsRef<Path>) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_yields_only_dirs_and_tolerates_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("a")).unwrap();
        fs::create_dir(tmp.path().join("b")).unwrap();
        fs::write(tmp.path().join("file.txt"), b"x").unwrap();

        let mut found: Vec<_> = directories(tmp.path())
            .map(|p| p.file_name().unwrap().to_owned())
            .collect();
        found.sort();
        assert_eq!(found, vec!["a", "b"]);

        assert_eq!(directories(tmp.path().join("missing")).count(), 0);
    }

    #[tokio::test]
    async fn rename_with_retry_moves_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let from = tmp.path().join("from.txt");
        let to = tmp.path().join("to.txt");
        fs::write(&from, b"hello").unwrap();

        rename_with_retry(&from, &to).await.unwrap();

        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).unwrap(), "hello");
    }

    #[test]
    fn replace_symlink_creates_then_replaces() {
        let tmp = tempfile::tempdir().unwrap();
        let target_a = tmp.path().join("a.txt");
        let target_b = tmp.path().join("b.txt");
        fs::write(&target_a, b"a").unwrap();
        fs::write(&target_b, b"b").unwrap();
        let link = tmp.path().join("link");

        #[cfg(unix)]
        {
            replace_symlink(&target_a, &link).unwrap();
            assert_eq!(fs::read_to_string(&link).unwrap(), "a");

            replace_symlink(&target_b, &link).unwrap();
            assert_eq!(fs::read_to_string(&link).unwrap(), "b");
        }
    }
}
