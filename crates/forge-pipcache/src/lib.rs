//! The pip two-phase cache: layers serialization and publish
//! semantics on top of the content store and the two-phase
//! fingerprint store.

use forge_content::{ContentError, ContentStore, ContentStoreExt, RetryPolicy};
use forge_twophase::{LookupHints, TwoPhaseError, TwoPhaseFingerprintStore};
use forge_types::{
    CacheEntry, ContentHash, ObservedPathSet, PathSetHash, PublishMode, PublishOutcome,
    StrongFingerprint, WeakFingerprint,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipCacheError {
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    TwoPhase(#[from] TwoPhaseError),
}

/// Outcome of [`publish`]: either the pip's own metadata was recorded, or
/// an entry for this `(weak, pathSetHash, strong)` already existed and the
/// pip has converged with it — the caller should use the returned entry's
/// metadata hash instead of its own.
#[derive(Debug, Clone)]
pub enum PublishResult {
    Published {
        path_set_hash: PathSetHash,
        metadata_hash: ContentHash,
    },
    Converged(CacheEntry),
}

fn content_hash_as_path_set_hash(hash: ContentHash) -> PathSetHash {
    PathSetHash::from_raw(*hash.raw())
}

fn path_set_hash_as_content_hash(hash: &PathSetHash) -> ContentHash {
    ContentHash::from_raw(*hash.raw())
}

/// Serialize `pathset` and `metadata`, store both in the content store, and
/// publish the resulting `(weak, pathSetHash, strong, CacheEntry)` to the
/// two-phase fingerprint store. On `ExistedAlready`, the conflicting entry
/// supersedes the caller's metadata hash for later retrieval — the pip has
/// converged with a prior result.
pub async fn publish<C, S, T>(
    content: &C,
    two_phase: &S,
    weak: &WeakFingerprint,
    strong: &StrongFingerprint,
    pathset: &ObservedPathSet,
    metadata: &T,
    originating_cache_id: impl Into<String>,
    referenced_content_hashes: Vec<ContentHash>,
    mode: PublishMode,
) -> Result<PublishResult, PipCacheError>
where
    C: ContentStore + ?Sized,
    S: TwoPhaseFingerprintStore + ?Sized,
    T: Serialize + Sync,
{
    let path_set_hash = content_hash_as_path_set_hash(content.serialize_and_store(pathset).await?);
    let metadata_hash = content.serialize_and_store(metadata).await?;

    let entry = CacheEntry {
        metadata_hash,
        originating_cache_id: originating_cache_id.into(),
        referenced_content_hashes,
    };

    let outcome = two_phase
        .try_publish(weak, &path_set_hash, strong, entry, mode)
        .await?;

    Ok(match outcome {
        PublishOutcome::Published => PublishResult::Published {
            path_set_hash,
            metadata_hash,
        },
        PublishOutcome::ExistedAlready(existing) => PublishResult::Converged(existing),
    })
}

/// Look up the cache entry for `(weak, pathSetHash, strong)` and, if
/// present, load and deserialize its metadata. Corruption detection and
/// retry happen inside [`ContentStoreExt::load_and_deserialize`], emitting
/// `DeserializingCorruptedPipFingerprintEntry` diagnostics on each retry.
pub async fn try_retrieve<C, S, T>(
    content: &C,
    two_phase: &S,
    weak: &WeakFingerprint,
    path_set_hash: &PathSetHash,
    strong: &StrongFingerprint,
    hints: &LookupHints,
) -> Result<Option<(CacheEntry, T)>, PipCacheError>
where
    C: ContentStore + ?Sized,
    S: TwoPhaseFingerprintStore + ?Sized,
    T: DeserializeOwned + forge_content::PossiblyCorrupted + Send,
{
    let Some(entry) = two_phase
        .try_get_cache_entry(weak, path_set_hash, strong, hints)
        .await?
    else {
        return Ok(None);
    };
    let metadata = content
        .load_and_deserialize(&entry.metadata_hash, RetryPolicy::default())
        .await?;
    Ok(Some((entry, metadata)))
}

/// Load and deserialize the pathset addressed by `path_set_hash`.
pub async fn load_pathset<C>(content: &C, path_set_hash: &PathSetHash) -> Result<ObservedPathSet, PipCacheError>
where
    C: ContentStore + ?Sized,
{
    let hash = path_set_hash_as_content_hash(path_set_hash);
    Ok(content.load_and_deserialize(&hash, RetryPolicy::default()).await?)
}
