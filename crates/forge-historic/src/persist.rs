//! On-disk shape of the `HistoricMetadataCacheEntriesKeys` blob: one group
//! per weak fingerprint, entries within a group written in ascending TTL
//! order so a plain push-per-entry read rebuilds the stack with the most
//! recently added entry on top.

use forge_types::{ContentHash, PathSetHash, StrongFingerprint, WeakFingerprint};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEntries {
    pub groups: Vec<PersistedWeakGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedWeakGroup {
    pub weak: WeakFingerprint,
    pub semistable_hash: u64,
    pub entries: Vec<PersistedStrongEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedStrongEntry {
    pub strong: StrongFingerprint,
    pub path_set_hash: PathSetHash,
    pub metadata_hash: ContentHash,
    pub ttl: u8,
}
