//! Shared data model for the content-addressed caching and materialization
//! engine: hashes, fingerprints, artifact identities, and the small set of
//! value types every other `forge-*` crate builds on.

mod artifact;
mod cache_entry;
mod descriptor;
mod expirable;
mod hash;
mod materialization;
mod origin;
mod pathset;
mod perf;

pub use artifact::{AbsolutePath, DirectoryArtifact, FileArtifact, PartialSealId, SealDirectoryKind};
pub use cache_entry::{CacheEntry, Locality, PublishMode, PublishOutcome, PublishedEntry, PublishedEntryRef};
pub use descriptor::PipCacheDescriptorV2Metadata;
pub use expirable::Expirable;
pub use hash::{
    ContentHash, Fingerprint, HashType, PathSetHash, RawHash, StreamingHasher, StrongFingerprint,
    WeakFingerprint, WellKnownContentHashes, HASH_LEN,
};
pub use materialization::{FileMaterializationInfo, ReparsePointInfo};
pub use origin::Origin;
pub use pathset::{ObservationFlags, ObservedPathSet, PathObservation};
pub use perf::{PerfCounters, PerfSnapshot};
