//! The artifact content cache adapter: pin, store, load,
//! and open-stream content by hash, plus realize content onto disk.

mod error;
mod local;
mod trait_def;

pub use error::ContentError;
pub use local::LocalContentStore;
pub use trait_def::{
    AvailabilityReport, AvailabilitySource, ContentStore, ContentStoreExt, HashAvailability,
    MaterializeOutcome, PossiblyCorrupted, RealizationMode, RetryPolicy, TrackedFileContentInfo,
};

/// Pathsets carry no self-reported corruption flag of their own; a failed
/// deserialize already surfaces as [`ContentError::Deserialize`], so the
/// retry path in [`ContentStoreExt::load_and_deserialize`] never loops for
/// this type.
impl PossiblyCorrupted for forge_types::ObservedPathSet {}

impl PossiblyCorrupted for forge_types::PipCacheDescriptorV2Metadata {
    fn is_corrupted(&self) -> bool {
        self.corrupted
    }
}
