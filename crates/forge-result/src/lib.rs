//! The execution-result carrier: aggregates a pip's materialization
//! outcome behind a seal invariant — mutable until [`ExecutionResult::seal`],
//! read-only (and mergeable-from-retries no longer) after.

use std::sync::atomic::{AtomicBool, Ordering};

use forge_types::{
    AbsolutePath, ContentHash, DirectoryArtifact, FileArtifact, FileMaterializationInfo, Origin,
    ObservedPathSet, PathSetHash, PerfSnapshot, StrongFingerprint, WeakFingerprint,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputContent {
    pub file: FileArtifact,
    pub info: FileMaterializationInfo,
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryOutput {
    pub directory: DirectoryArtifact,
    pub contents: Vec<FileArtifact>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwoPhaseInfo {
    pub weak: WeakFingerprint,
    pub strong: StrongFingerprint,
    pub path_set_hash: PathSetHash,
}

/// A single recorded disallowed file access, described informally since
/// the sandbox executor that detects these is out of scope here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAccessViolation {
    pub path: AbsolutePath,
    pub description: String,
}

/// The aggregate result of running (or retrieving from cache) one pip.
///
/// Mutable through its `&mut self` setters until [`Self::seal`]; every
/// accessor `debug_assert!`s the sealed flag, and every setter
/// `debug_assert!`s its absence, so a programmer error (reading before
/// sealing or writing after) panics in debug builds without needing a
/// `Result` return type at every call site.
#[derive(Debug)]
pub struct ExecutionResult {
    sealed: AtomicBool,
    status: Option<ExecutionStatus>,
    outputs: Vec<OutputContent>,
    directory_outputs: Vec<DirectoryOutput>,
    weak_fingerprint: Option<WeakFingerprint>,
    two_phase_info: Option<TwoPhaseInfo>,
    metadata_hash: Option<ContentHash>,
    dynamic_observations: ObservedPathSet,
    created_directories: Vec<AbsolutePath>,
    perf: PerfSnapshot,
    file_access_violations: Vec<FileAccessViolation>,
    shared_dynamic_opaque_writes: Vec<FileArtifact>,
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self {
            sealed: AtomicBool::new(false),
            status: None,
            outputs: Vec::new(),
            directory_outputs: Vec::new(),
            weak_fingerprint: None,
            two_phase_info: None,
            metadata_hash: None,
            dynamic_observations: ObservedPathSet::new(),
            created_directories: Vec::new(),
            perf: PerfSnapshot::default(),
            file_access_violations: Vec::new(),
            shared_dynamic_opaque_writes: Vec::new(),
        }
    }
}

impl ExecutionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn set_status(&mut self, status: ExecutionStatus) -> &mut Self {
        debug_assert!(!self.is_sealed(), "ExecutionResult mutated after seal()");
        self.status = Some(status);
        self
    }

    pub fn add_output(&mut self, output: OutputContent) -> &mut Self {
        debug_assert!(!self.is_sealed(), "ExecutionResult mutated after seal()");
        self.outputs.push(output);
        self
    }

    pub fn add_directory_output(&mut self, output: DirectoryOutput) -> &mut Self {
        debug_assert!(!self.is_sealed(), "ExecutionResult mutated after seal()");
        self.directory_outputs.push(output);
        self
    }

    pub fn set_weak_fingerprint(&mut self, weak: WeakFingerprint) -> &mut Self {
        debug_assert!(!self.is_sealed(), "ExecutionResult mutated after seal()");
        self.weak_fingerprint = Some(weak);
        self
    }

    pub fn set_two_phase_info(&mut self, info: TwoPhaseInfo) -> &mut Self {
        debug_assert!(!self.is_sealed(), "ExecutionResult mutated after seal()");
        self.two_phase_info = Some(info);
        self
    }

    pub fn set_metadata_hash(&mut self, hash: ContentHash) -> &mut Self {
        debug_assert!(!self.is_sealed(), "ExecutionResult mutated after seal()");
        self.metadata_hash = Some(hash);
        self
    }

    pub fn set_dynamic_observations(&mut self, observations: ObservedPathSet) -> &mut Self {
        debug_assert!(!self.is_sealed(), "ExecutionResult mutated after seal()");
        self.dynamic_observations = observations;
        self
    }

    pub fn add_created_directory(&mut self, path: AbsolutePath) -> &mut Self {
        debug_assert!(!self.is_sealed(), "ExecutionResult mutated after seal()");
        self.created_directories.push(path);
        self
    }

    pub fn set_perf(&mut self, perf: PerfSnapshot) -> &mut Self {
        debug_assert!(!self.is_sealed(), "ExecutionResult mutated after seal()");
        self.perf = perf;
        self
    }

    pub fn add_file_access_violation(&mut self, violation: FileAccessViolation) -> &mut Self {
        debug_assert!(!self.is_sealed(), "ExecutionResult mutated after seal()");
        self.file_access_violations.push(violation);
        self
    }

    pub fn add_shared_dynamic_opaque_write(&mut self, file: FileArtifact) -> &mut Self {
        debug_assert!(!self.is_sealed(), "ExecutionResult mutated after seal()");
        self.shared_dynamic_opaque_writes.push(file);
        self
    }

    /// Union in another in-flight attempt's file-access violations and
    /// shared-dynamic-opaque writes (retries of the same pip accumulate
    /// both sets rather than replacing them).
    pub fn merge_retry(&mut self, other: &Self) -> &mut Self {
        debug_assert!(!self.is_sealed(), "ExecutionResult mutated after seal()");
        debug_assert!(!other.is_sealed(), "merge_retry's source must itself still be unsealed");
        for violation in &other.file_access_violations {
            if !self.file_access_violations.contains(violation) {
                self.file_access_violations.push(violation.clone());
            }
        }
        for file in &other.shared_dynamic_opaque_writes {
            if !self.shared_dynamic_opaque_writes.contains(file) {
                self.shared_dynamic_opaque_writes.push(file.clone());
            }
        }
        self
    }

    /// Freeze the result. Idempotent — calling `seal()` again is a no-op,
    /// not an error.
    pub fn seal(&mut self) -> &mut Self {
        self.sealed.store(true, Ordering::Release);
        self
    }

    pub fn status(&self) -> ExecutionStatus {
        debug_assert!(self.is_sealed(), "ExecutionResult read before seal()");
        self.status.expect("ExecutionResult sealed without a status")
    }

    pub fn outputs(&self) -> &[OutputContent] {
        debug_assert!(self.is_sealed(), "ExecutionResult read before seal()");
        &self.outputs
    }

    pub fn directory_outputs(&self) -> &[DirectoryOutput] {
        debug_assert!(self.is_sealed(), "ExecutionResult read before seal()");
        &self.directory_outputs
    }

    pub fn weak_fingerprint(&self) -> Option<WeakFingerprint> {
        debug_assert!(self.is_sealed(), "ExecutionResult read before seal()");
        self.weak_fingerprint
    }

    pub fn two_phase_info(&self) -> Option<TwoPhaseInfo> {
        debug_assert!(self.is_sealed(), "ExecutionResult read before seal()");
        self.two_phase_info
    }

    pub fn metadata_hash(&self) -> Option<ContentHash> {
        debug_assert!(self.is_sealed(), "ExecutionResult read before seal()");
        self.metadata_hash
    }

    pub fn dynamic_observations(&self) -> &ObservedPathSet {
        debug_assert!(self.is_sealed(), "ExecutionResult read before seal()");
        &self.dynamic_observations
    }

    pub fn created_directories(&self) -> &[AbsolutePath] {
        debug_assert!(self.is_sealed(), "ExecutionResult read before seal()");
        &self.created_directories
    }

    pub fn perf(&self) -> PerfSnapshot {
        debug_assert!(self.is_sealed(), "ExecutionResult read before seal()");
        self.perf
    }

    pub fn file_access_violations(&self) -> &[FileAccessViolation] {
        debug_assert!(self.is_sealed(), "ExecutionResult read before seal()");
        &self.file_access_violations
    }

    pub fn shared_dynamic_opaque_writes(&self) -> &[FileArtifact] {
        debug_assert!(self.is_sealed(), "ExecutionResult read before seal()");
        &self.shared_dynamic_opaque_writes
    }

    /// The overall [`Origin`] for this result, by precedence over every
    /// recorded output (`Produced > DeployedFromCache > UpToDate >
    /// NotMaterialized`).
    pub fn overall_origin(&self) -> Origin {
        debug_assert!(self.is_sealed(), "ExecutionResult read before seal()");
        Origin::overall(self.outputs.iter().map(|o| o.origin))
    }

    /// Build a new, already-sealed result that has converged with `other`:
    /// output content, directory outputs, two-phase info, and the metadata
    /// hash come from `other` (the prior result this pip converged with),
    /// while this pip's own observations, created directories, and
    /// performance counters are kept.
    pub fn create_sealed_converged(&self, other: &Self) -> Self {
        debug_assert!(self.is_sealed() && other.is_sealed(), "create_sealed_converged requires both inputs sealed");
        Self {
            sealed: AtomicBool::new(true),
            status: self.status,
            outputs: other.outputs.clone(),
            directory_outputs: other.directory_outputs.clone(),
            weak_fingerprint: self.weak_fingerprint,
            two_phase_info: other.two_phase_info,
            metadata_hash: other.metadata_hash,
            dynamic_observations: self.dynamic_observations.clone(),
            created_directories: self.created_directories.clone(),
            perf: self.perf,
            file_access_violations: self.file_access_violations.clone(),
            shared_dynamic_opaque_writes: self.shared_dynamic_opaque_writes.clone(),
        }
    }
}
