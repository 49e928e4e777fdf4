use serde::{Deserialize, Serialize};

use crate::artifact::AbsolutePath;
use crate::hash::ContentHash;

/// Windows reparse-point metadata, carried opaquely by
/// [`FileMaterializationInfo`] when the target is a symlink/junction
/// rather than regular file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReparsePointInfo {
    pub target: String,
    pub is_directory: bool,
}

/// `{ contentHash, length?, fileName?, reparsePointInfo?, isExecutable,
/// isUndeclaredFileRewrite, opaqueDirectoryRoot?,
/// dynamicOutputCaseSensitiveRelativeDirectory? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMaterializationInfo {
    pub content_hash: ContentHash,
    pub length: Option<u64>,
    pub file_name: Option<String>,
    pub reparse_point_info: Option<ReparsePointInfo>,
    pub is_executable: bool,
    pub is_undeclared_file_rewrite: bool,
    pub opaque_directory_root: Option<AbsolutePath>,
    pub dynamic_output_case_sensitive_relative_directory: Option<String>,
}

impl FileMaterializationInfo {
    pub fn new(content_hash: ContentHash) -> Self {
        Self {
            content_hash,
            length: None,
            file_name: None,
            reparse_point_info: None,
            is_executable: false,
            is_undeclared_file_rewrite: false,
            opaque_directory_root: None,
            dynamic_output_case_sensitive_relative_directory: None,
        }
    }

    #[must_use]
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    #[must_use]
    pub fn executable(mut self, is_executable: bool) -> Self {
        self.is_executable = is_executable;
        self
    }

    /// Sanity-check two reports of the same [`crate::artifact::FileArtifact`]
    /// for structural compatibility, independent of whether their content
    /// hashes agree.
    ///
    /// Returns `Err` describing the first structural mismatch found.
    pub fn sanity_check_against(&self, other: &Self) -> Result<(), String> {
        if let (Some(a), Some(b)) = (self.length, other.length) {
            if a != b {
                return Err(format!("length mismatch: {a} != {b}"));
            }
        }
        if let (Some(a), Some(b)) = (&self.file_name, &other.file_name) {
            if !a.eq_ignore_ascii_case(b) {
                return Err(format!("file name mismatch: {a} != {b}"));
            }
        }
        Ok(())
    }
}
