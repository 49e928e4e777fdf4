//! The sealed-directory registry: records the declared contents of
//! static and dynamic (opaque) sealed directories, and answers membership
//! queries against them.

use std::collections::HashSet;
use std::path::Path;

use dashmap::{DashMap, DashSet};
use forge_types::{AbsolutePath, DirectoryArtifact, FileArtifact, SealDirectoryKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SealError {
    #[error("path {path} was sealed twice with different rewrite counts ({first} != {second})")]
    RewriteCountConflict {
        path: String,
        first: u32,
        second: u32,
    },
    #[error("full-seal scrub of {path} failed: {source}")]
    ScrubFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Registry for C5. Every map is independently lockable via `dashmap`, so
/// registration of unrelated directories never contends.
#[derive(Debug, Default)]
pub struct SealRegistry {
    sealed_files: DashMap<AbsolutePath, FileArtifact>,
    registered_seal_directories: DashSet<DirectoryArtifact>,
    sealed_source_directories: DashMap<AbsolutePath, DirectoryArtifact>,
    seal_contents: DashMap<DirectoryArtifact, Vec<FileArtifact>>,
    dynamic_output_file_directories: DashMap<FileArtifact, DirectoryArtifact>,
    /// Caches each queried path's resolved source-seal ancestor (or `None`)
    /// so repeat lookups for the same path never re-walk its parents.
    source_seal_ancestor_cache: DashMap<AbsolutePath, Option<AbsolutePath>>,
}

impl SealRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn reserve_sealed_files(&self, contents: &[FileArtifact]) -> Result<(), SealError> {
        for file in contents {
            if let Some(existing) = self.sealed_files.get(&file.path) {
                if existing.rewrite_count != file.rewrite_count {
                    return Err(SealError::RewriteCountConflict {
                        path: file.path.as_path().display().to_string(),
                        first: existing.rewrite_count,
                        second: file.rewrite_count,
                    });
                }
            }
        }
        for file in contents {
            self.sealed_files.insert(file.path.clone(), file.clone());
        }
        Ok(())
    }

    /// Register a static seal directory known at pip-graph time. Idempotent
    /// for an unchanged `contents`; a path sealed twice with a different
    /// rewrite count is a contract violation (`RewriteCountConflict`).
    ///
    /// When `kind` is [`SealDirectoryKind::Full`], this also scrubs
    /// `root_fs_path`: any file under the root not present in `contents`
    /// is deleted, and a diagnostic is emitted per deletion. A scrub IO
    /// failure is reported but does not roll back the registration —
    /// unsealed content may simply persist until the next full-seal scrub.
    pub fn register_static(
        &self,
        dir: DirectoryArtifact,
        kind: SealDirectoryKind,
        mut contents: Vec<FileArtifact>,
        root_fs_path: Option<&Path>,
    ) -> Result<(), SealError> {
        self.reserve_sealed_files(&contents)?;

        if kind.is_source() {
            self.sealed_source_directories
                .insert(dir.path.clone(), dir.clone());
        }

        contents.sort();
        self.seal_contents.insert(dir.clone(), contents.clone());
        self.registered_seal_directories.insert(dir.clone());

        if matches!(kind, SealDirectoryKind::Full) {
            if let Some(root) = root_fs_path {
                self.full_seal_scrub(root, &contents)?;
            }
        }

        Ok(())
    }

    fn full_seal_scrub(&self, root: &Path, contents: &[FileArtifact]) -> Result<(), SealError> {
        let preserve: HashSet<_> = contents
            .iter()
            .map(|f| f.path.as_path().to_path_buf())
            .collect();
        let removed = forge_fs::remove_tree_except(root, &preserve).map_err(|source| SealError::ScrubFailed {
            path: root.display().to_string(),
            source,
        })?;
        for path in removed {
            forge_events::full_seal_scrub_deleted_file(&AbsolutePath::new(path));
        }
        Ok(())
    }

    /// Register the contents of a dynamic (opaque) output directory,
    /// discovered only after its producing pip completes. Set-or-get: if a
    /// concurrent caller already registered this directory, the winning
    /// contents are returned instead (idempotent).
    pub fn register_dynamic(&self, dir: DirectoryArtifact, mut contents: Vec<FileArtifact>) -> Vec<FileArtifact> {
        contents.sort();
        let winner = self
            .seal_contents
            .entry(dir.clone())
            .or_insert_with(|| contents)
            .clone();

        self.registered_seal_directories.insert(dir.clone());
        for file in &winner {
            self.dynamic_output_file_directories
                .entry(file.clone())
                .or_insert_with(|| dir.clone());
        }
        winner
    }

    /// Cached sorted contents of `dir`. Dynamic directories missing from
    /// the cache (not yet produced, or produced on another worker) yield an
    /// empty array rather than an error.
    pub fn list_contents(&self, dir: &DirectoryArtifact) -> Vec<FileArtifact> {
        self.seal_contents
            .get(dir)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Walk `path`'s ancestors until a sealed-source directory is found.
    /// The answer for `path` itself is cached, short-circuiting future
    /// walks for the same path (not for its intermediate ancestors).
    pub fn try_source_seal_ancestor(&self, path: &AbsolutePath) -> Option<DirectoryArtifact> {
        if let Some(cached) = self.source_seal_ancestor_cache.get(path) {
            return cached
                .as_ref()
                .and_then(|ancestor| self.sealed_source_directories.get(ancestor).map(|d| d.clone()));
        }

        let mut current = path.parent();
        let mut found_path = None;
        let mut found_dir = None;
        while let Some(candidate) = current {
            if let Some(dir) = self.sealed_source_directories.get(&candidate) {
                found_path = Some(candidate);
                found_dir = Some(dir.clone());
                break;
            }
            current = candidate.parent();
        }

        self.source_seal_ancestor_cache
            .insert(path.clone(), found_path);
        found_dir
    }

    /// The file artifact sealed at exactly `path`, if any (distinct from
    /// [`Self::try_source_seal_ancestor`], which walks parents).
    pub fn sealed_file_at(&self, path: &AbsolutePath) -> Option<FileArtifact> {
        self.sealed_files.get(path).map(|f| f.clone())
    }

    pub fn is_registered(&self, dir: &DirectoryArtifact) -> bool {
        self.registered_seal_directories.contains(dir)
    }

    pub fn dynamic_directory_of(&self, file: &FileArtifact) -> Option<DirectoryArtifact> {
        self.dynamic_output_file_directories.get(file).map(|d| d.clone())
    }
}
