use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// The sealed result record a [`crate::CacheEntry::metadata_hash`] points
/// to: everything about a cached pip's
/// outcome that isn't the pathset or the output bytes themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipCacheDescriptorV2Metadata {
    pub output_hashes: Vec<ContentHash>,
    pub warning_count: u32,
    /// Stable identity of the producing pip across pip-graph rebuilds,
    /// used by the historic cache's `semistableHash <-> weak` index.
    pub semistable_hash: u64,
    pub number_of_output_directories: u32,
    /// Set by the serializer when it detects the descriptor it just wrote
    /// is internally inconsistent; a consumer's corruption-retry path
    /// checks this rather than treating it as a public invariant here.
    pub corrupted: bool,
}

impl PipCacheDescriptorV2Metadata {
    pub fn new(semistable_hash: u64) -> Self {
        Self {
            output_hashes: Vec::new(),
            warning_count: 0,
            semistable_hash,
            number_of_output_directories: 0,
            corrupted: false,
        }
    }
}
