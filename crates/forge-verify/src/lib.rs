//! The source-file verifier: on a distributed worker, confirm a
//! materialization-set source file matches the hash the coordinator
//! expects before placing anything, so a worker with a stale or tampered
//! source never silently produces divergent output.

use forge_types::{AbsolutePath, ContentHash, StreamingHasher};
use fs_err as fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// What the coordinator expects to find at a source path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedState {
    Exists(ContentHash),
    Absent,
}

/// Result of verifying one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Matched,
    Mismatched,
}

/// Hash `path` locally (if it exists) and compare against `expected`,
/// logging the specific `PipInputVerificationMismatch*` diagnostic on
/// disagreement. A mismatch is a normal, expected outcome — not an error —
/// so the caller can abort just that file's materialization; [`VerifyError`]
/// is reserved for IO failures unrelated to the expectation itself (e.g.
/// permission denied reading an existing file).
pub fn verify_source_file(path: &AbsolutePath, expected: ExpectedState) -> Result<VerificationOutcome, VerifyError> {
    let fs_path = path.as_path();
    let metadata = match fs::symlink_metadata(fs_path) {
        Ok(metadata) => Some(metadata),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(source) => {
            return Err(VerifyError::Io {
                path: fs_path.display().to_string(),
                source,
            })
        }
    };

    match (expected, metadata) {
        (ExpectedState::Absent, None) => Ok(VerificationOutcome::Matched),
        (ExpectedState::Absent, Some(_)) => {
            forge_events::pip_input_verification_mismatch_expected_non_existence(path);
            Ok(VerificationOutcome::Mismatched)
        }
        (ExpectedState::Exists(_), None) => {
            forge_events::pip_input_verification_mismatch_expected_existence(path);
            Ok(VerificationOutcome::Mismatched)
        }
        (ExpectedState::Exists(_), Some(metadata)) if metadata.is_dir() => {
            forge_events::pip_input_verification_mismatch(path, "expected a file but found a directory");
            Ok(VerificationOutcome::Mismatched)
        }
        (ExpectedState::Exists(expected_hash), Some(_)) => {
            let bytes = fs::read(fs_path).map_err(|source| VerifyError::Io {
                path: fs_path.display().to_string(),
                source,
            })?;
            let mut hasher = StreamingHasher::new();
            hasher.update(&bytes);
            let actual = ContentHash::from_raw(hasher.finalize());

            if actual == expected_hash {
                Ok(VerificationOutcome::Matched)
            } else {
                forge_events::pip_input_verification_mismatch_for_source_file(path, &expected_hash, &actual);
                Ok(VerificationOutcome::Mismatched)
            }
        }
    }
}
