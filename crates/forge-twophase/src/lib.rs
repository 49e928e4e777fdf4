//! The two-phase fingerprint store: a persistent map
//! `weak -> { strong, pathset } -> cache entry`.
//!
//! This crate defines the trait — the seam for the otherwise-external,
//! potentially-remote cache service named in §1's Non-goals — and one
//! concrete, process-local implementation (`LocalTwoPhaseStore`) good
//! enough to drive the rest of the engine end to end without a real
//! network collaborator.

use std::collections::HashMap;

use dashmap::DashMap;
use forge_types::{
    CacheEntry, Locality, PathSetHash, PublishMode, PublishOutcome, PublishedEntryRef,
    StrongFingerprint, WeakFingerprint,
};
use parking_lot::Mutex;
use thiserror::Error;

/// Hint bag passed to lookups, letting a remote implementation narrow its
/// search (e.g. by originating cache id); the local implementation
/// ignores it.
#[derive(Debug, Clone, Default)]
pub struct LookupHints {
    pub originating_cache_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum TwoPhaseError {
    #[error("two-phase store is unavailable: {0}")]
    Unavailable(String),
}

/// The two-phase fingerprint store contract.
#[async_trait::async_trait]
pub trait TwoPhaseFingerprintStore: Send + Sync {
    /// Enumerate published `(strong, pathSetHash)` candidates for `weak`.
    /// The sequence is finite and may mix local and remote results; order
    /// is store-defined but stable enough for duplicate suppression by
    /// the caller.
    async fn list_published(
        &self,
        weak: &WeakFingerprint,
        hints: &LookupHints,
    ) -> Result<Vec<PublishedEntryRef>, TwoPhaseError>;

    async fn try_get_cache_entry(
        &self,
        weak: &WeakFingerprint,
        path_set_hash: &PathSetHash,
        strong: &StrongFingerprint,
        hints: &LookupHints,
    ) -> Result<Option<CacheEntry>, TwoPhaseError>;

    async fn try_publish(
        &self,
        weak: &WeakFingerprint,
        path_set_hash: &PathSetHash,
        strong: &StrongFingerprint,
        entry: CacheEntry,
        mode: PublishMode,
    ) -> Result<PublishOutcome, TwoPhaseError>;

    /// Deposit a cache entry keyed purely by `weak`, used to publish the
    /// historic cache's own serialized blob.
    async fn try_publish_temporal(
        &self,
        weak: &WeakFingerprint,
        entry: CacheEntry,
    ) -> Result<PublishOutcome, TwoPhaseError>;

    /// Symmetric read for [`Self::try_publish_temporal`].
    async fn try_get_latest(&self, weak: &WeakFingerprint) -> Result<Option<CacheEntry>, TwoPhaseError>;
}

#[derive(Debug, Clone)]
struct Record {
    path_set_hash: PathSetHash,
    strong: StrongFingerprint,
    entry: CacheEntry,
}

/// Process-local implementation of [`TwoPhaseFingerprintStore`]. Every
/// entry's locality is [`Locality::Local`]; a remote implementation is a
/// drop-in replacement behind the same trait, intentionally not built
/// here.
#[derive(Debug, Default)]
pub struct LocalTwoPhaseStore {
    by_weak: DashMap<WeakFingerprint, Mutex<Vec<Record>>>,
    temporal: DashMap<WeakFingerprint, CacheEntry>,
}

impl LocalTwoPhaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TwoPhaseFingerprintStore for LocalTwoPhaseStore {
    async fn list_published(
        &self,
        weak: &WeakFingerprint,
        _hints: &LookupHints,
    ) -> Result<Vec<PublishedEntryRef>, TwoPhaseError> {
        let Some(records) = self.by_weak.get(weak) else {
            return Ok(Vec::new());
        };
        let records = records.lock();
        Ok(records
            .iter()
            .rev()
            .map(|r| PublishedEntryRef {
                path_set_hash: r.path_set_hash,
                strong: r.strong,
                originating_cache_id: r.entry.originating_cache_id.clone(),
                locality: Locality::Local,
            })
            .collect())
    }

    async fn try_get_cache_entry(
        &self,
        weak: &WeakFingerprint,
        path_set_hash: &PathSetHash,
        strong: &StrongFingerprint,
        _hints: &LookupHints,
    ) -> Result<Option<CacheEntry>, TwoPhaseError> {
        let Some(records) = self.by_weak.get(weak) else {
            return Ok(None);
        };
        let records = records.lock();
        Ok(records
            .iter()
            .find(|r| r.path_set_hash == *path_set_hash && r.strong == *strong)
            .map(|r| r.entry.clone()))
    }

    async fn try_publish(
        &self,
        weak: &WeakFingerprint,
        path_set_hash: &PathSetHash,
        strong: &StrongFingerprint,
        entry: CacheEntry,
        mode: PublishMode,
    ) -> Result<PublishOutcome, TwoPhaseError> {
        let slot = self.by_weak.entry(*weak).or_default();
        let mut records = slot.lock();

        if let Some(existing) = records
            .iter()
            .find(|r| r.path_set_hash == *path_set_hash && r.strong == *strong)
        {
            return match mode {
                PublishMode::CreateNew => {
                    Ok(PublishOutcome::ExistedAlready(existing.entry.clone()))
                }
                PublishMode::CreateOrReplace => {
                    let replaced_index = records
                        .iter()
                        .position(|r| r.path_set_hash == *path_set_hash && r.strong == *strong)
                        .expect("just found above");
                    records[replaced_index].entry = entry;
                    Ok(PublishOutcome::Published)
                }
            };
        }

        records.push(Record {
            path_set_hash: *path_set_hash,
            strong: *strong,
            entry,
        });
        Ok(PublishOutcome::Published)
    }

    async fn try_publish_temporal(
        &self,
        weak: &WeakFingerprint,
        entry: CacheEntry,
    ) -> Result<PublishOutcome, TwoPhaseError> {
        let prior = self.temporal.insert(*weak, entry);
        Ok(match prior {
            Some(prior) => PublishOutcome::ExistedAlready(prior),
            None => PublishOutcome::Published,
        })
    }

    async fn try_get_latest(&self, weak: &WeakFingerprint) -> Result<Option<CacheEntry>, TwoPhaseError> {
        Ok(self.temporal.get(weak).map(|e| e.clone()))
    }
}

/// Deduplicate a batch of [`PublishedEntryRef`]s by `(path_set_hash,
/// strong)`, keeping the first occurrence — used when a caller merges
/// local and remote results and wants stable duplicate suppression.
pub fn dedupe_published(entries: Vec<PublishedEntryRef>) -> Vec<PublishedEntryRef> {
    let mut seen = HashMap::new();
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let key = (entry.path_set_hash, entry.strong);
        if seen.insert(key, ()).is_none() {
            out.push(entry);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_types::ContentHash;

    fn entry(tag: &str) -> CacheEntry {
        CacheEntry {
            metadata_hash: ContentHash::from_bytes(tag.as_bytes()),
            originating_cache_id: "local".to_string(),
            referenced_content_hashes: vec![],
        }
    }

    #[tokio::test]
    async fn publish_then_get_cache_entry_round_trips() {
        let store = LocalTwoPhaseStore::new();
        let weak = WeakFingerprint::from_bytes(b"weak");
        let strong = StrongFingerprint::from_bytes(b"strong");
        let path_set_hash = PathSetHash::from_bytes(b"pathset");

        let outcome = store
            .try_publish(
                &weak,
                &path_set_hash,
                &strong,
                entry("m1"),
                PublishMode::CreateNew,
            )
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Published);

        let fetched = store
            .try_get_cache_entry(&weak, &path_set_hash, &strong, &LookupHints::default())
            .await
            .unwrap();
        assert_eq!(fetched, Some(entry("m1")));
    }

    #[tokio::test]
    async fn create_new_reports_existed_already_and_does_not_overwrite() {
        let store = LocalTwoPhaseStore::new();
        let weak = WeakFingerprint::from_bytes(b"weak");
        let strong = StrongFingerprint::from_bytes(b"strong");
        let path_set_hash = PathSetHash::from_bytes(b"pathset");

        store
            .try_publish(&weak, &path_set_hash, &strong, entry("m1"), PublishMode::CreateNew)
            .await
            .unwrap();

        let outcome = store
            .try_publish(&weak, &path_set_hash, &strong, entry("m2"), PublishMode::CreateNew)
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::ExistedAlready(entry("m1")));

        let fetched = store
            .try_get_cache_entry(&weak, &path_set_hash, &strong, &LookupHints::default())
            .await
            .unwrap();
        assert_eq!(fetched, Some(entry("m1")));
    }

    #[tokio::test]
    async fn create_or_replace_overwrites() {
        let store = LocalTwoPhaseStore::new();
        let weak = WeakFingerprint::from_bytes(b"weak");
        let strong = StrongFingerprint::from_bytes(b"strong");
        let path_set_hash = PathSetHash::from_bytes(b"pathset");

        store
            .try_publish(&weak, &path_set_hash, &strong, entry("m1"), PublishMode::CreateNew)
            .await
            .unwrap();
        store
            .try_publish(
                &weak,
                &path_set_hash,
                &strong,
                entry("m2"),
                PublishMode::CreateOrReplace,
            )
            .await
            .unwrap();

        let fetched = store
            .try_get_cache_entry(&weak, &path_set_hash, &strong, &LookupHints::default())
            .await
            .unwrap();
        assert_eq!(fetched, Some(entry("m2")));
    }

    #[tokio::test]
    async fn list_published_yields_most_recently_added_first() {
        let store = LocalTwoPhaseStore::new();
        let weak = WeakFingerprint::from_bytes(b"weak");

        for i in 0..3u8 {
            let strong = StrongFingerprint::from_bytes(&[i]);
            let path_set_hash = PathSetHash::from_bytes(&[i]);
            store
                .try_publish(&weak, &path_set_hash, &strong, entry("m"), PublishMode::CreateNew)
                .await
                .unwrap();
        }

        let listed = store.list_published(&weak, &LookupHints::default()).await.unwrap();
        let strongs: Vec<_> = listed.iter().map(|r| r.strong).collect();
        assert_eq!(
            strongs,
            vec![
                StrongFingerprint::from_bytes(&[2]),
                StrongFingerprint::from_bytes(&[1]),
                StrongFingerprint::from_bytes(&[0]),
            ]
        );
    }

    #[tokio::test]
    async fn temporal_publish_and_get_latest_round_trip() {
        let store = LocalTwoPhaseStore::new();
        let weak = WeakFingerprint::from_bytes(b"weak");

        store.try_publish_temporal(&weak, entry("snapshot-1")).await.unwrap();
        assert_eq!(
            store.try_get_latest(&weak).await.unwrap(),
            Some(entry("snapshot-1"))
        );

        store.try_publish_temporal(&weak, entry("snapshot-2")).await.unwrap();
        assert_eq!(
            store.try_get_latest(&weak).await.unwrap(),
            Some(entry("snapshot-2"))
        );
    }

    #[test]
    fn dedupe_published_keeps_first_occurrence() {
        let r = |tag: u8| PublishedEntryRef {
            path_set_hash: PathSetHash::from_bytes(&[tag]),
            strong: StrongFingerprint::from_bytes(&[tag]),
            originating_cache_id: tag.to_string(),
            locality: Locality::Local,
        };
        let deduped = dedupe_published(vec![r(1), r(2), r(1)]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].originating_cache_id, "1");
    }
}
