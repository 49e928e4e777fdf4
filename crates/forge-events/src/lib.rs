//! Structured logging events for the caching and materialization engine.
//!
//! A plain set of event functions taking a context argument; the event
//! identity is an integer constant per event ([`EventId`]), and each
//! function logs through `tracing` at the right level. Call sites read
//! `forge_events::file_artifact_content_mismatch(...)` rather than
//! reaching for `tracing::warn!` ad hoc, so the event's wording and
//! level stay consistent wherever it fires.

use std::fmt;

use forge_types::{AbsolutePath, ContentHash};

/// Stable integer identity for each event, so external log processors can
/// key on a number rather than parse message text.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventId {
    FileArtifactContentMismatch = 1,
    DeserializingCorruptedPipFingerprintEntry = 2,
    PipInputVerificationMismatch = 3,
    PipInputVerificationMismatchForSourceFile = 4,
    PipInputVerificationMismatchExpectedExistence = 5,
    PipInputVerificationMismatchExpectedNonExistence = 6,
    FailedToLoadFileContentWarning = 7,
    PipHydratedFile = 8,
    FullSealScrubDeletedFile = 9,
    HistoricMetadataCacheDisabled = 10,
    ContentGarbageCollectionCancelled = 11,
}

impl EventId {
    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(#{})", self, self.code())
    }
}

/// Two conflicting [`forge_types::FileMaterializationInfo`] reports were
/// made for the same [`FileArtifact`](forge_types::FileArtifact), and the
/// conflict policy downgraded the conflict from a hard error to a
/// warning.
pub fn file_artifact_content_mismatch(path: &AbsolutePath, first: &ContentHash, second: &ContentHash) {
    tracing::warn!(
        event = %EventId::FileArtifactContentMismatch,
        path = %path.as_path().display(),
        first = %first,
        second = %second,
        "file artifact content mismatch; keeping first report",
    );
}

/// A pathset or metadata blob failed to deserialize into its expected
/// structure, or the blob's self-reported hash didn't match the hash it
/// was requested under.
pub fn deserializing_corrupted_pip_fingerprint_entry(hash: &ContentHash, attempt: u32) {
    tracing::warn!(
        event = %EventId::DeserializingCorruptedPipFingerprintEntry,
        hash = %hash,
        attempt,
        "pip fingerprint entry failed to deserialize; retrying",
    );
}

/// A source file's locally computed hash does not match the hash expected
/// by the coordinator.
pub fn pip_input_verification_mismatch_for_source_file(
    path: &AbsolutePath,
    expected: &ContentHash,
    actual: &ContentHash,
) {
    tracing::error!(
        event = %EventId::PipInputVerificationMismatchForSourceFile,
        path = %path.as_path().display(),
        expected = %expected,
        actual = %actual,
        "source file content does not match expected hash",
    );
}

/// A source file that was expected to exist does not.
pub fn pip_input_verification_mismatch_expected_existence(path: &AbsolutePath) {
    tracing::error!(
        event = %EventId::PipInputVerificationMismatchExpectedExistence,
        path = %path.as_path().display(),
        "expected source file to exist, but it does not",
    );
}

/// A source file that was expected to be absent exists.
pub fn pip_input_verification_mismatch_expected_non_existence(path: &AbsolutePath) {
    tracing::error!(
        event = %EventId::PipInputVerificationMismatchExpectedNonExistence,
        path = %path.as_path().display(),
        "expected source file to not exist, but it does",
    );
}

/// Catch-all input-verification mismatch not covered by the more specific
/// variants above.
pub fn pip_input_verification_mismatch(path: &AbsolutePath, reason: &str) {
    tracing::error!(
        event = %EventId::PipInputVerificationMismatch,
        path = %path.as_path().display(),
        reason,
        "pip input verification mismatch",
    );
}

/// Content recovery exhausted every option for an unavailable
/// hash; the file's materialization fails.
pub fn failed_to_load_file_content_warning(path: &AbsolutePath, hash: &ContentHash) {
    tracing::warn!(
        event = %EventId::FailedToLoadFileContentWarning,
        path = %path.as_path().display(),
        hash = %hash,
        "failed to load file content; materialization will fail",
    );
}

/// A virtualized file was hydrated (its bytes fetched on first read).
pub fn pip_hydrated_file(path: &AbsolutePath) {
    tracing::debug!(
        event = %EventId::PipHydratedFile,
        path = %path.as_path().display(),
        "hydrated virtualized file",
    );
}

/// A full-seal scrub deleted a file that was not part of the declared
/// seal contents.
pub fn full_seal_scrub_deleted_file(path: &AbsolutePath) {
    tracing::info!(
        event = %EventId::FullSealScrubDeletedFile,
        path = %path.as_path().display(),
        "deleted unsealed file during full-seal scrub",
    );
}

/// The historic metadata cache's KV store failed to open twice in a row
/// and has been disabled for the remainder of the process.
pub fn historic_metadata_cache_disabled(reason: &str) {
    tracing::warn!(
        event = %EventId::HistoricMetadataCacheDisabled,
        reason,
        "historic metadata cache disabled for this session",
    );
}

/// The content column garbage collector was cancelled mid-pass.
pub fn content_garbage_collection_cancelled(last_key_hex: &str) {
    tracing::debug!(
        event = %EventId::ContentGarbageCollectionCancelled,
        cursor = last_key_hex,
        "content garbage collection cancelled; cursor saved",
    );
}
