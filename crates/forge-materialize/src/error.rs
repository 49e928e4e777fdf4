use thiserror::Error;

use forge_types::ContentHash;

/// Failures raised by the materialization coordinator.
///
/// Every variant is `Clone` so it can live inside a
/// [`crate::reservation::Completion`] and be handed to every waiter on a
/// reservation, not just the one that produced it — the underlying IO or
/// content-store error is therefore flattened to its `Display` string
/// rather than kept as a `#[source]` chain.
#[derive(Debug, Clone, Error)]
pub enum MaterializeError {
    /// Content recovery exhausted every option for this hash.
    #[error("content {0} could not be made available for materialization")]
    Unavailable(ContentHash),

    #[error("io error at {path}: {message}")]
    Io { path: String, message: String },

    /// A distributed-worker source-file verification mismatch
    /// aborted this file's materialization.
    #[error("source verification mismatch at {0}")]
    VerificationMismatch(String),

    /// Directory preparation failed to delete or recreate
    /// an opaque directory root.
    #[error("directory preparation failed at {path}: {message}")]
    DirectoryPrepFailed { path: String, message: String },

    /// Cooperative cancellation resolved this reservation before it
    /// completed; never logged above `debug`.
    #[error("materialization cancelled")]
    Cancelled,

    #[error("content store error: {0}")]
    Content(String),

    #[error("file hash registry error: {0}")]
    FileHash(String),

    #[error("seal registry error: {0}")]
    Seal(String),
}

impl MaterializeError {
    pub fn io(path: impl Into<String>, source: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: source.to_string(),
        }
    }
}

impl From<forge_content::ContentError> for MaterializeError {
    fn from(err: forge_content::ContentError) -> Self {
        Self::Content(err.to_string())
    }
}

impl From<forge_filehash::FileHashError> for MaterializeError {
    fn from(err: forge_filehash::FileHashError) -> Self {
        Self::FileHash(err.to_string())
    }
}

impl From<forge_seals::SealError> for MaterializeError {
    fn from(err: forge_seals::SealError) -> Self {
        Self::Seal(err.to_string())
    }
}
