use serde::{Deserialize, Serialize};

use crate::hash::{ContentHash, PathSetHash, StrongFingerprint};

/// `{ metadataHash, originatingCacheId, referencedContentHashes }`:
/// the historic layer's record of "what a pip run produced".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub metadata_hash: ContentHash,
    pub originating_cache_id: String,
    pub referenced_content_hashes: Vec<ContentHash>,
}

/// `{ strong, pathSetHash }`: the minimal key identifying one
/// candidate result for a given weak fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublishedEntry {
    pub strong: StrongFingerprint,
    pub path_set_hash: PathSetHash,
}

/// Where a [`PublishedEntryRef`] was found: in this process/host's own
/// store, or fetched from a remote collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locality {
    Local,
    Remote,
}

/// `{ pathSetHash, strong, originatingCacheId, locality }`: one
/// candidate yielded by [`list_published`](crate) enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedEntryRef {
    pub path_set_hash: PathSetHash,
    pub strong: StrongFingerprint,
    pub originating_cache_id: String,
    pub locality: Locality,
}

/// Outcome of a publish attempt against the two-phase fingerprint store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// An entry for this `(weak, pathSetHash, strong)` already existed;
    /// the caller's metadata is superseded by the conflicting entry.
    ExistedAlready(CacheEntry),
}

/// Publish mode for `try_publish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Fail with `ExistedAlready` if an entry is already present.
    CreateNew,
    /// Overwrite any existing entry.
    CreateOrReplace,
}
