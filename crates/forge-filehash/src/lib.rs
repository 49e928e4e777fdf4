//! The file-hash registry: per-[`FileArtifact`] content bookkeeping
//! with a configurable conflict policy, plus the "sealed or undeclared"
//! probe used to form strong fingerprints.

use dashmap::{DashMap, DashSet};
use fs_err as fs;
use forge_seals::SealRegistry;
use forge_types::{
    AbsolutePath, ContentHash, FileArtifact, FileMaterializationInfo, Origin, StreamingHasher,
    WellKnownContentHashes,
};
use thiserror::Error;

/// How [`FileHashRegistry::report_content`] handles a conflicting report
/// for the same [`FileArtifact`] (different content hash than already on
/// file).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Raise [`FileHashError::ContentConflict`].
    Strict,
    /// Log [`forge_events::file_artifact_content_mismatch`] and keep the
    /// first report, returning [`ReportOutcome::NotAdded`].
    Warn,
}

#[derive(Debug, Error)]
pub enum FileHashError {
    #[error("conflicting content reported for {file:?}: {first} != {second}")]
    ContentConflict {
        file: FileArtifact,
        first: ContentHash,
        second: ContentHash,
    },
    #[error("structurally inconsistent reports for {file:?}: {reason}")]
    SanityMismatch { file: FileArtifact, reason: String },
    #[error("no content ever recorded for {0:?}")]
    NotRecorded(FileArtifact),
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of [`FileHashRegistry::report_content`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// No prior info for this artifact; the new report was inserted.
    Inserted,
    /// Prior info matched; materialization was (re)affirmed.
    Reaffirmed,
    /// Prior info matched and nothing changed.
    NoOp,
    /// Conflicted with prior info under [`ConflictPolicy::Warn`]; the
    /// first report was kept.
    NotAdded,
}

/// Outcome of [`FileHashRegistry::try_query_sealed_or_undeclared`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Found(FileMaterializationInfo),
    /// The probed path is a directory; returned in place of a real hash.
    Untracked,
    NotFound,
}

#[derive(Debug)]
pub struct FileHashRegistry {
    conflict_policy: ConflictPolicy,
    file_hashes: DashMap<FileArtifact, FileMaterializationInfo>,
    materialized: DashSet<FileArtifact>,
    all_cache_content_hashes: DashSet<ContentHash>,
    /// Reverse of `file_hashes`, keyed by content hash rather than
    /// artifact identity: lets materialization's content-recovery path
    /// find another `FileArtifact` carrying the same
    /// bytes without a linear scan.
    content_hash_index: DashMap<ContentHash, DashSet<FileArtifact>>,
    content_queried_directory_paths: DashSet<AbsolutePath>,
    paths_without_file_artifact: DashSet<AbsolutePath>,
}

impl FileHashRegistry {
    pub fn new(conflict_policy: ConflictPolicy) -> Self {
        Self {
            conflict_policy,
            file_hashes: DashMap::new(),
            materialized: DashSet::new(),
            all_cache_content_hashes: DashSet::new(),
            content_hash_index: DashMap::new(),
            content_queried_directory_paths: DashSet::new(),
            paths_without_file_artifact: DashSet::new(),
        }
    }

    /// Record content observed for `file`, honoring the conflict policy on
    /// disagreement with a prior report.
    pub fn report_content(
        &self,
        file: FileArtifact,
        info: FileMaterializationInfo,
        origin: Origin,
    ) -> Result<ReportOutcome, FileHashError> {
        let Some(prior) = self.file_hashes.get(&file).map(|v| v.clone()) else {
            self.all_cache_content_hashes.insert(info.content_hash);
            self.content_hash_index
                .entry(info.content_hash)
                .or_default()
                .insert(file.clone());
            self.file_hashes.insert(file.clone(), info);
            if origin != Origin::NotMaterialized {
                self.materialized.insert(file);
            }
            return Ok(ReportOutcome::Inserted);
        };

        prior
            .sanity_check_against(&info)
            .map_err(|reason| FileHashError::SanityMismatch {
                file: file.clone(),
                reason,
            })?;

        if prior.content_hash == info.content_hash {
            if origin != Origin::NotMaterialized {
                let was_materialized = !self.materialized.insert(file);
                return Ok(if was_materialized {
                    ReportOutcome::NoOp
                } else {
                    ReportOutcome::Reaffirmed
                });
            }
            return Ok(ReportOutcome::NoOp);
        }

        match self.conflict_policy {
            ConflictPolicy::Strict => Err(FileHashError::ContentConflict {
                file,
                first: prior.content_hash,
                second: info.content_hash,
            }),
            ConflictPolicy::Warn => {
                forge_events::file_artifact_content_mismatch(&file.path, &prior.content_hash, &info.content_hash);
                Ok(ReportOutcome::NotAdded)
            }
        }
    }

    /// The recorded content for `file`. A contract violation (no prior
    /// [`Self::report_content`] call) is reported as
    /// [`FileHashError::NotRecorded`] rather than panicking, so callers at
    /// the materialization boundary can convert it into their own failure
    /// type.
    pub fn get_input_content(&self, file: &FileArtifact) -> Result<FileMaterializationInfo, FileHashError> {
        self.file_hashes
            .get(file)
            .map(|v| v.clone())
            .ok_or_else(|| FileHashError::NotRecorded(file.clone()))
    }

    /// Resolve content for `path`: a declared sealed file, a source file
    /// under a sealed-source ancestor, or (if `allow_undeclared_reads`) any
    /// other existing file.
    pub fn try_query_sealed_or_undeclared(
        &self,
        path: &AbsolutePath,
        allow_undeclared_reads: bool,
        seals: &SealRegistry,
    ) -> Result<QueryOutcome, FileHashError> {
        if let Some(artifact) = seals.sealed_file_at(path) {
            return self.hash_source_artifact(&artifact);
        }

        let ancestor = seals.try_source_seal_ancestor(path);
        if ancestor.is_none() && !allow_undeclared_reads {
            self.paths_without_file_artifact.insert(path.clone());
            return Ok(QueryOutcome::NotFound);
        }

        if allow_undeclared_reads && !path.as_path().exists() {
            return Ok(QueryOutcome::NotFound);
        }

        self.hash_source_artifact(&FileArtifact::source(path.clone()))
    }

    fn hash_source_artifact(&self, artifact: &FileArtifact) -> Result<QueryOutcome, FileHashError> {
        let fs_path = artifact.path.as_path();
        let metadata = fs::symlink_metadata(fs_path).map_err(|source| FileHashError::Io {
            path: fs_path.display().to_string(),
            source,
        })?;

        if metadata.is_dir() {
            self.content_queried_directory_paths
                .insert(artifact.path.clone());
            return Ok(QueryOutcome::Untracked);
        }

        let bytes = fs::read(fs_path).map_err(|source| FileHashError::Io {
            path: fs_path.display().to_string(),
            source,
        })?;
        let mut hasher = StreamingHasher::new();
        hasher.update(&bytes);
        let hash = ContentHash::from_raw(hasher.finalize());
        let info = FileMaterializationInfo::new(hash).with_length(bytes.len() as u64);

        self.report_content(artifact.clone(), info.clone(), Origin::NotMaterialized)?;
        Ok(QueryOutcome::Found(info))
    }

    /// Whether `file` has ever been reported with an origin other than
    /// [`Origin::NotMaterialized`] (used by content recovery to tell
    /// "known on disk" artifacts from merely-observed ones).
    pub fn is_materialized(&self, file: &FileArtifact) -> bool {
        self.materialized.contains(file)
    }

    /// Every [`FileArtifact`] currently on record with content `hash`,
    /// including `file` itself if it was the one reporting it. Content
    /// recovery uses this to find a copy-source with the
    /// same bytes as an artifact whose own content is unavailable.
    pub fn artifacts_with_content(&self, hash: ContentHash) -> Vec<FileArtifact> {
        self.content_hash_index
            .get(&hash)
            .map(|set| set.iter().map(|a| a.clone()).collect())
            .unwrap_or_default()
    }

    pub fn all_cache_content_hashes(&self) -> Vec<ContentHash> {
        self.all_cache_content_hashes.iter().map(|h| *h).collect()
    }

    pub fn paths_without_file_artifact(&self) -> Vec<AbsolutePath> {
        self.paths_without_file_artifact
            .iter()
            .map(|p| p.clone())
            .collect()
    }

    pub fn content_queried_directory_paths(&self) -> Vec<AbsolutePath> {
        self.content_queried_directory_paths
            .iter()
            .map(|p| p.clone())
            .collect()
    }
}

/// Sentinel used in place of a real hash when a probed path turns out to
/// be a directory.
pub fn untracked_sentinel() -> ContentHash {
    WellKnownContentHashes::untracked_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_seals::SealRegistry;
    use forge_types::SealDirectoryKind;

    fn artifact(path: &str) -> FileArtifact {
        FileArtifact::source(AbsolutePath::new(path))
    }

    fn info(tag: &str) -> FileMaterializationInfo {
        FileMaterializationInfo::new(ContentHash::from_bytes(tag.as_bytes()))
    }

    #[test]
    fn report_content_inserts_then_reaffirms_matching_report() {
        let registry = FileHashRegistry::new(ConflictPolicy::Strict);
        let file = artifact("/out/a.txt");

        let outcome = registry
            .report_content(file.clone(), info("a"), Origin::Produced)
            .unwrap();
        assert_eq!(outcome, ReportOutcome::Inserted);

        let outcome = registry
            .report_content(file.clone(), info("a"), Origin::UpToDate)
            .unwrap();
        assert_eq!(outcome, ReportOutcome::Reaffirmed);

        assert_eq!(registry.get_input_content(&file).unwrap(), info("a"));
    }

    #[test]
    fn report_content_conflict_is_strict_by_default_error() {
        let registry = FileHashRegistry::new(ConflictPolicy::Strict);
        let file = artifact("/out/a.txt");
        registry
            .report_content(file.clone(), info("a"), Origin::Produced)
            .unwrap();

        let err = registry
            .report_content(file, info("b"), Origin::Produced)
            .unwrap_err();
        assert!(matches!(err, FileHashError::ContentConflict { .. }));
    }

    #[test]
    fn report_content_conflict_under_warn_policy_keeps_first_and_does_not_error() {
        let registry = FileHashRegistry::new(ConflictPolicy::Warn);
        let file = artifact("/out/a.txt");
        registry
            .report_content(file.clone(), info("a"), Origin::Produced)
            .unwrap();

        let outcome = registry
            .report_content(file.clone(), info("b"), Origin::Produced)
            .unwrap();
        assert_eq!(outcome, ReportOutcome::NotAdded);
        assert_eq!(registry.get_input_content(&file).unwrap(), info("a"));
    }

    #[test]
    fn artifacts_with_content_finds_every_reporter_of_a_hash() {
        let registry = FileHashRegistry::new(ConflictPolicy::Strict);
        let shared = info("shared-bytes");
        registry
            .report_content(artifact("/a"), shared.clone(), Origin::Produced)
            .unwrap();
        registry
            .report_content(artifact("/b"), shared.clone(), Origin::NotMaterialized)
            .unwrap();

        let mut found = registry.artifacts_with_content(shared.content_hash);
        found.sort();
        assert_eq!(found, vec![artifact("/a"), artifact("/b")]);
        assert!(registry.is_materialized(&artifact("/a")));
        assert!(!registry.is_materialized(&artifact("/b")));
    }

    #[test]
    fn get_input_content_without_prior_report_is_not_recorded() {
        let registry = FileHashRegistry::new(ConflictPolicy::Strict);
        let err = registry.get_input_content(&artifact("/never/reported")).unwrap_err();
        assert!(matches!(err, FileHashError::NotRecorded(_)));
    }

    #[test]
    fn try_query_sealed_or_undeclared_finds_source_under_sealed_ancestor() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("main.rs"), b"fn main() {}").unwrap();

        let seals = SealRegistry::new();
        let dir = forge_types::DirectoryArtifact {
            path: AbsolutePath::new(tmp.path()),
            partial_seal_id: forge_types::PartialSealId(1),
            is_shared_opaque: false,
        };
        seals
            .register_static(dir, SealDirectoryKind::SourceAllDirectories, vec![], None)
            .unwrap();

        let registry = FileHashRegistry::new(ConflictPolicy::Strict);
        let path = AbsolutePath::new(tmp.path().join("main.rs"));
        let outcome = registry
            .try_query_sealed_or_undeclared(&path, false, &seals)
            .unwrap();
        assert!(matches!(outcome, QueryOutcome::Found(_)));
    }

    #[test]
    fn try_query_sealed_or_undeclared_rejects_undeclared_reads_when_disallowed() {
        let seals = SealRegistry::new();
        let registry = FileHashRegistry::new(ConflictPolicy::Strict);
        let path = AbsolutePath::new("/unsealed/file.txt");

        let outcome = registry
            .try_query_sealed_or_undeclared(&path, false, &seals)
            .unwrap();
        assert_eq!(outcome, QueryOutcome::NotFound);
        assert_eq!(registry.paths_without_file_artifact(), vec![path]);
    }

    #[test]
    fn try_query_sealed_or_undeclared_allows_undeclared_reads_of_existing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let file_path = tmp.path().join("undeclared.txt");
        std::fs::write(&file_path, b"hi").unwrap();

        let seals = SealRegistry::new();
        let registry = FileHashRegistry::new(ConflictPolicy::Strict);
        let path = AbsolutePath::new(&file_path);

        let outcome = registry
            .try_query_sealed_or_undeclared(&path, true, &seals)
            .unwrap();
        assert!(matches!(outcome, QueryOutcome::Found(_)));
    }

    #[test]
    fn try_query_sealed_or_undeclared_reports_untracked_for_directories() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("subdir")).unwrap();

        let seals = SealRegistry::new();
        let dir = forge_types::DirectoryArtifact {
            path: AbsolutePath::new(tmp.path()),
            partial_seal_id: forge_types::PartialSealId(1),
            is_shared_opaque: false,
        };
        seals
            .register_static(dir, SealDirectoryKind::SourceAllDirectories, vec![], None)
            .unwrap();

        let registry = FileHashRegistry::new(ConflictPolicy::Strict);
        let path = AbsolutePath::new(tmp.path().join("subdir"));
        let outcome = registry
            .try_query_sealed_or_undeclared(&path, false, &seals)
            .unwrap();
        assert_eq!(outcome, QueryOutcome::Untracked);
        assert_eq!(registry.content_queried_directory_paths(), vec![path]);
    }
}
