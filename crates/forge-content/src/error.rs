use forge_types::ContentHash;
use thiserror::Error;

/// Errors raised by the content cache adapter.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content {0} is not available locally or remotely")]
    Unavailable(ContentHash),

    #[error("content {0} deserialized to a corrupted structure after {attempts} attempt(s)")]
    Corrupted { hash: ContentHash, attempts: u32 },

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize content: {0}")]
    Serialize(#[source] rmp_serde::encode::Error),

    #[error("failed to deserialize content: {0}")]
    Deserialize(#[source] rmp_serde::decode::Error),
}

impl ContentError {
    /// Human-readable description, matching the crate-wide
    /// `Failure::describe()` convention.
    pub fn describe(&self) -> String {
        self.to_string()
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
