use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// An absolute path, the unit of identity for files and directories
/// throughout this crate. A thin newtype rather than a bare `PathBuf` so
/// call sites are forced to reason about absoluteness at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AbsolutePath(PathBuf);

impl AbsolutePath {
    /// Wrap a path, asserting it is absolute. Panics on a relative path:
    /// this is a programmer error at every call site in this crate, not a
    /// recoverable condition (the same `.expect()`-on-structural-invariant
    /// style used elsewhere for contract violations).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        assert!(
            path.is_absolute(),
            "AbsolutePath requires an absolute path, got {}",
            path.display()
        );
        Self(path)
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    pub fn join(&self, segment: impl AsRef<Path>) -> Self {
        Self(self.0.join(segment))
    }

    pub fn parent(&self) -> Option<Self> {
        self.0.parent().map(|p| Self(p.to_path_buf()))
    }
}

impl AsRef<Path> for AbsolutePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// `{ path, rewriteCount }`. `rewrite_count == 0` means this artifact
/// is a source file; any higher value means it is the Nth output written
/// to this path over the pip graph's lifetime. Two `FileArtifact`s with
/// the same path and different rewrite counts are distinct identities
/// with an ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileArtifact {
    pub path: AbsolutePath,
    pub rewrite_count: u32,
}

impl FileArtifact {
    pub fn source(path: AbsolutePath) -> Self {
        Self {
            path,
            rewrite_count: 0,
        }
    }

    pub fn output(path: AbsolutePath, rewrite_count: u32) -> Self {
        assert!(rewrite_count > 0, "an output FileArtifact must have rewrite_count > 0; use FileArtifact::source for rewrite_count == 0");
        Self {
            path,
            rewrite_count,
        }
    }

    pub fn is_source(&self) -> bool {
        self.rewrite_count == 0
    }
}

impl PartialOrd for FileArtifact {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileArtifact {
    /// Orders first by path, then by rewrite count, so that artifacts
    /// sharing a path sort with the lowest rewrite count first — the
    /// order materialization must respect.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.path
            .cmp(&other.path)
            .then(self.rewrite_count.cmp(&other.rewrite_count))
    }
}

/// Opaque identifier distinguishing one partial seal from another at the
/// same root path; assigned by the pip-graph builder (out of scope here —
/// we just carry it opaquely).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartialSealId(pub u32);

/// `{ path, partialSealId, isSharedOpaque }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectoryArtifact {
    pub path: AbsolutePath,
    pub partial_seal_id: PartialSealId,
    pub is_shared_opaque: bool,
}

/// Directory seal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SealDirectoryKind {
    /// All contents are declared up front; unsealed content is scrubbed.
    Full,
    /// A declared subset of contents within a larger directory.
    Partial,
    /// Source directory, only the top-level entries are tracked.
    SourceTopOnly,
    /// Source directory, all nested entries are tracked.
    SourceAllDirectories,
    /// Dynamic (opaque) output directory; contents are only known after
    /// the producing pip completes. Exclusive: only one pip may produce
    /// into a given opaque directory.
    Opaque,
    /// Dynamic output directory shared by multiple producing pips.
    SharedOpaque,
}

impl SealDirectoryKind {
    pub fn is_dynamic(self) -> bool {
        matches!(self, Self::Opaque | Self::SharedOpaque)
    }

    pub fn is_source(self) -> bool {
        matches!(self, Self::SourceTopOnly | Self::SourceAllDirectories)
    }
}
