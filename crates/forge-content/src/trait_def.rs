use std::collections::HashMap;
use std::path::Path;

use forge_types::{ContentHash, Origin};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ContentError;

pub use forge_fs::RealizationMode;

/// Where a hash's bytes were found when checking availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilitySource {
    Local,
    Remote,
    Unavailable,
}

/// Per-hash result of a [`ContentStore::load_available`] batch query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashAvailability {
    pub available: bool,
    pub source: AvailabilitySource,
    pub bytes_transferred: u64,
}

/// Result of a batch availability check.
#[derive(Debug, Clone, Default)]
pub struct AvailabilityReport {
    pub per_hash: HashMap<ContentHash, HashAvailability>,
    pub all_available: bool,
}

/// Metadata about a file tracked after materialization, handed back so
/// the caller can record it without re-stating the hash/path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFileContentInfo {
    pub hash: ContentHash,
    pub length: u64,
}

/// Outcome of [`ContentStore::materialize`]: only `UpToDate` or
/// `DeployedFromCache` are possible here — `Produced` and
/// `NotMaterialized` are outcomes of running a pip or skipping
/// materialization entirely, decided one layer up in `forge-materialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeOutcome {
    pub origin: Origin,
    pub tracked: Option<TrackedFileContentInfo>,
}

/// How many times [`ContentStoreExt::load_and_deserialize`] retries a
/// descriptor that deserializes but marks itself corrupted.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // LoadingAndDeserializingRetries.
        Self { max_attempts: 3 }
    }
}

/// A deserialized descriptor that can mark itself corrupted (set by the
/// serializer when it detects an inconsistency at write time, or left
/// `false` normally). `load_and_deserialize`'s retry loop only re-fetches
/// when this reports `true`; any other failure (IO, malformed bytes)
/// returns immediately.
pub trait PossiblyCorrupted {
    fn is_corrupted(&self) -> bool {
        false
    }
}

/// The artifact content cache adapter: pin, store, load, and
/// open-stream content by hash, plus realize content onto disk.
///
/// This is the seam between the engine and the pluggable blob store a
/// networked deployment would use; [`crate::LocalContentStore`] is the one
/// concrete implementation carried in this crate, standing in for a
/// networked/remote store.
#[async_trait::async_trait]
pub trait ContentStore: Send + Sync {
    /// Batch-check whether `hashes` are available, potentially
    /// transferring bytes over the network to pin them locally.
    async fn load_available(&self, hashes: &[ContentHash]) -> Result<AvailabilityReport, ContentError>;

    /// Store the file at `path`. If `hash` is supplied, the store
    /// integrity-checks the file against it; otherwise it computes the
    /// hash itself.
    async fn store_path(&self, path: &Path, hash: Option<ContentHash>) -> Result<ContentHash, ContentError>;

    /// Store `bytes` directly (used for serialized descriptors/pathsets).
    async fn store_bytes(&self, bytes: &[u8], hash: Option<ContentHash>) -> Result<ContentHash, ContentError>;

    /// Read back the full bytes for `hash`. Fails with
    /// [`ContentError::Unavailable`] if the hash is not present locally
    /// even after an implicit pin attempt.
    async fn read_bytes(&self, hash: &ContentHash) -> Result<Vec<u8>, ContentError>;

    /// Realize `hash`'s content at `target_path` according to
    /// `realization_mode`, returning the outcome and (if `track` is set)
    /// the tracked file info.
    async fn materialize(
        &self,
        hash: &ContentHash,
        realization_mode: RealizationMode,
        target_path: &Path,
        allow_virtualization: bool,
        track: bool,
    ) -> Result<MaterializeOutcome, ContentError>;
}

/// Generic serialize/deserialize helpers layered on top of the
/// dyn-compatible [`ContentStore`] trait (generic methods can't live on
/// the trait itself without losing object safety). Uses native
/// async-fn-in-trait rather than `async_trait`, since these methods are
/// only ever called concretely, never through a `dyn ContentStoreExt`.
pub trait ContentStoreExt: ContentStore {
    /// Serialize `value` deterministically and store it, returning the
    /// content hash that addresses it.
    async fn serialize_and_store<T>(&self, value: &T) -> Result<ContentHash, ContentError>
    where
        T: Serialize + Sync,
    {
        let bytes = rmp_serde::to_vec(value).map_err(ContentError::Serialize)?;
        self.store_bytes(&bytes, None).await
    }

    /// Load and deserialize the value stored under `hash`, retrying per
    /// `retry_policy` while the descriptor reports itself corrupted.
    async fn load_and_deserialize<T>(
        &self,
        hash: &ContentHash,
        retry_policy: RetryPolicy,
    ) -> Result<T, ContentError>
    where
        T: DeserializeOwned + PossiblyCorrupted + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let bytes = self.read_bytes(hash).await?;
            match rmp_serde::from_slice::<T>(&bytes) {
                Ok(value) if value.is_corrupted() && attempt < retry_policy.max_attempts => {
                    forge_events::deserializing_corrupted_pip_fingerprint_entry(hash, attempt);
                    continue;
                }
                Ok(value) if value.is_corrupted() => {
                    return Err(ContentError::Corrupted {
                        hash: *hash,
                        attempts: attempt,
                    });
                }
                Ok(value) => return Ok(value),
                Err(err) => return Err(ContentError::Deserialize(err)),
            }
        }
    }
}

impl<T: ContentStore + ?Sized> ContentStoreExt for T {}
