use std::io;
use std::path::Path;

use fs_err as fs;

/// Realization modes for placing cached content on disk.
/// `allowVirtualization` is handled one layer up, in `forge-materialize`,
/// since it depends on the host's virtualization provider rather than on
/// raw filesystem calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealizationMode {
    /// Hardlink when possible (same filesystem, source immutable enough
    /// to share); fall back to a full copy otherwise.
    HardLinkOrCopy,
    /// Always make an independent copy.
    Copy,
}

/// Place `source`'s bytes at `target` according to `mode`. Removes any
/// existing file at `target` first (placement always targets a clean
/// path; the materialization coordinator is responsible for clearing the
/// way in rewrite-count order first).
pub fn hardlink_or_copy(source: &Path, target: &Path, mode: RealizationMode) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    if target.exists() {
        fs::remove_file(target)?;
    }

    match mode {
        RealizationMode::Copy => {
            fs::copy(source, target)?;
        }
        RealizationMode::HardLinkOrCopy => match reflink_copy::reflink_or_copy(source, target) {
            Ok(_) => {}
            Err(_) => match fs::hard_link(source, target) {
                Ok(()) => {}
                Err(_) => {
                    fs::copy(source, target)?;
                }
            },
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_mode_produces_independent_file() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source.txt");
        let target = tmp.path().join("target.txt");
        fs::write(&source, b"payload").unwrap();

        hardlink_or_copy(&source, &target, RealizationMode::Copy).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "payload");
    }

    #[test]
    fn hardlink_or_copy_overwrites_existing_target() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source.txt");
        let target = tmp.path().join("target.txt");
        fs::write(&source, b"new").unwrap();
        fs::write(&target, b"stale").unwrap();

        hardlink_or_copy(&source, &target, RealizationMode::HardLinkOrCopy).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
    }
}
