//! The historic metadata cache: an in-memory and persistent
//! accelerator sitting in front of a [`TwoPhaseFingerprintStore`] and a
//! [`ContentStore`], aging cache entries across process runs via
//! per-entry TTLs and a two-column content-hash remap table.
//!
//! This is the layer that makes repeated builds fast without a real
//! remote cache: everything it knows can always be rebuilt by asking the
//! delegate store again, so corruption or a missing KV file degrades to
//! "slower" rather than "wrong".

mod config;
mod persist;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use forge_content::{ContentError, ContentStore, ContentStoreExt, PossiblyCorrupted, RetryPolicy};
use forge_twophase::{LookupHints, TwoPhaseError, TwoPhaseFingerprintStore};
use forge_types::{
    CacheEntry, Expirable, Fingerprint, HashType, Locality, ObservedPathSet, PathSetHash,
    PublishedEntry, PublishedEntryRef, RawHash, StrongFingerprint, WeakFingerprint, HASH_LEN,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

pub use config::HistoricCacheConfig;
use persist::{PersistedEntries, PersistedStrongEntry, PersistedWeakGroup};

const FORMAT_VERSION: u32 = 1;
const GC_CHUNK_SIZE: usize = 256;

const FORMAT_VERSION_KEY: &[u8] = b"FormatVersion";
const AGE_KEY: &[u8] = b"Age";
const ACTIVE_REMAP_COLUMN_KEY: &[u8] = b"ActiveRemapColumn";
const ENTRIES_KEY: &[u8] = b"HistoricMetadataCacheEntriesKeys";
const GC_CURSOR_KEY: &[u8] = b"ContentGarbageCollectCursor";

const CONTENT_TREE: &str = "Content";
const REMAP_TREE_1: &str = "BuildManifestHash_1";
const REMAP_TREE_2: &str = "BuildManifestHash_2";

#[derive(Debug, Error)]
pub enum HistoricError {
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    TwoPhase(#[from] TwoPhaseError),
    #[error("historic cache storage error: {0}")]
    Sled(#[from] sled::Error),
    #[error("failed to encode a historic cache entry: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// The two rotating trees backing content-hash remapping,
/// addressed by an active/inactive index rather than by name once open.
struct Backend {
    db: sled::Db,
    content: sled::Tree,
    remap: [sled::Tree; 2],
}

impl Backend {
    fn open(dir: &Path) -> Option<Self> {
        let db = open_with_reset(dir)?;
        let content = db.open_tree(CONTENT_TREE).ok()?;
        let remap1 = db.open_tree(REMAP_TREE_1).ok()?;
        let remap2 = db.open_tree(REMAP_TREE_2).ok()?;
        Some(Self {
            db,
            content,
            remap: [remap1, remap2],
        })
    }
}

fn open_with_reset(dir: &Path) -> Option<sled::Db> {
    match sled::open(dir) {
        Ok(db) => Some(db),
        Err(_) => {
            let _ = std::fs::remove_dir_all(dir);
            sled::open(dir).ok()
        }
    }
}

fn remap_key(hash_type: HashType, source: &forge_types::ContentHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + HASH_LEN);
    key.push(hash_type as u8);
    key.extend_from_slice(source.raw().as_bytes());
    key
}

fn bytes_to_content_hash(bytes: &[u8]) -> Option<forge_types::ContentHash> {
    if bytes.len() != HASH_LEN {
        return None;
    }
    let mut arr = [0u8; HASH_LEN];
    arr.copy_from_slice(bytes);
    Some(forge_types::ContentHash::from_raw(RawHash::from_bytes(arr)))
}

/// The historic metadata cache itself, generic over the content store and
/// two-phase store it accelerates so tests can plug in local
/// implementations and the engine facade can plug in real ones.
pub struct HistoricMetadataCache<C, S> {
    config: HistoricCacheConfig,
    content: Arc<C>,
    delegate: Arc<S>,
    backend: Option<Backend>,

    load_once: tokio::sync::OnceCell<()>,
    age: AtomicU64,
    active_remap_column: AtomicU8,
    accessed_this_session: AtomicBool,

    gc_cancel: CancellationToken,
    gc_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,

    weak_stacks: DashMap<WeakFingerprint, Mutex<Vec<Expirable<PublishedEntry>>>>,
    full_fingerprint_to_metadata: DashMap<Fingerprint, forge_types::ContentHash>,
    semistable_to_weak: DashMap<u64, WeakFingerprint>,
    weak_to_semistable: DashMap<WeakFingerprint, u64>,
    new_content_entries: DashSet<forge_types::ContentHash>,
    retained_content_hash_codes: DashSet<u32>,
    existing_content_entries: DashSet<u32>,
    new_full_fingerprints: DashSet<Fingerprint>,
}

impl<C, S> HistoricMetadataCache<C, S>
where
    C: ContentStore,
    S: TwoPhaseFingerprintStore,
{
    pub fn open(dir: impl AsRef<Path>, config: HistoricCacheConfig, content: Arc<C>, delegate: Arc<S>) -> Self {
        let dir: PathBuf = dir.as_ref().to_path_buf();
        let backend = Backend::open(&dir);
        if backend.is_none() {
            forge_events::historic_metadata_cache_disabled("failed to open the historic cache KV store twice");
        }
        Self {
            config,
            content,
            delegate,
            backend,
            load_once: tokio::sync::OnceCell::new(),
            age: AtomicU64::new(0),
            active_remap_column: AtomicU8::new(0),
            accessed_this_session: AtomicBool::new(false),
            gc_cancel: CancellationToken::new(),
            gc_handle: Mutex::new(None),
            weak_stacks: DashMap::new(),
            full_fingerprint_to_metadata: DashMap::new(),
            semistable_to_weak: DashMap::new(),
            weak_to_semistable: DashMap::new(),
            new_content_entries: DashSet::new(),
            retained_content_hash_codes: DashSet::new(),
            existing_content_entries: DashSet::new(),
            new_full_fingerprints: DashSet::new(),
        }
    }

    /// Drive the single-run load latch. Every read/write operation awaits
    /// this first; the first caller pays the deserialization cost, every
    /// later caller observes the same completed state.
    async fn ensure_loaded(&self) -> Result<(), HistoricError> {
        self.load_once.get_or_try_init(|| self.do_load()).await?;
        Ok(())
    }

    async fn do_load(&self) -> Result<(), HistoricError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        let stored_version = backend.db.get(FORMAT_VERSION_KEY)?;
        let version_matches = stored_version
            .as_deref()
            .map(|bytes| bytes == FORMAT_VERSION.to_le_bytes())
            .unwrap_or(false);
        if !version_matches {
            backend.db.clear()?;
            backend.content.clear()?;
            backend.remap[0].clear()?;
            backend.remap[1].clear()?;
            backend.db.insert(FORMAT_VERSION_KEY, &FORMAT_VERSION.to_le_bytes())?;
        }

        let prior_age = backend
            .db
            .get(AGE_KEY)?
            .and_then(|v| v.as_ref().try_into().ok())
            .map(u64::from_le_bytes)
            .unwrap_or(0);
        let age = prior_age + 1;
        backend.db.insert(AGE_KEY, &age.to_le_bytes())?;
        self.age.store(age, Ordering::Release);

        let remap_ttl = self.config.remap_ttl_builds.max(1);
        let active = ((age / remap_ttl) % 2) as u8;
        let prior_active = backend
            .db
            .get(ACTIVE_REMAP_COLUMN_KEY)?
            .and_then(|v| v.first().copied())
            .unwrap_or(active);
        if prior_active != active {
            backend.remap[active as usize].clear()?;
        }
        backend.db.insert(ACTIVE_REMAP_COLUMN_KEY, &[active])?;
        self.active_remap_column.store(active, Ordering::Release);

        if let Some(bytes) = backend.db.get(ENTRIES_KEY)? {
            match rmp_serde::from_slice::<PersistedEntries>(&bytes) {
                Ok(persisted) => self.absorb_persisted_entries(persisted),
                Err(_) => {
                    forge_events::historic_metadata_cache_disabled(
                        "entries blob failed to deserialize; starting this session with an empty cache",
                    );
                }
            }
        }

        Ok(())
    }

    fn absorb_persisted_entries(&self, persisted: PersistedEntries) {
        for group in persisted.groups {
            self.semistable_to_weak.insert(group.semistable_hash, group.weak);
            self.weak_to_semistable.insert(group.weak, group.semistable_hash);
            let slot = self.weak_stacks.entry(group.weak).or_default();
            let mut stack = slot.lock();
            for stored in group.entries {
                let fingerprint = Fingerprint::new(&group.weak, &stored.strong);
                self.full_fingerprint_to_metadata.insert(fingerprint, stored.metadata_hash);
                let ttl = stored.ttl.saturating_sub(1);
                stack.push(Expirable::new(
                    PublishedEntry {
                        strong: stored.strong,
                        path_set_hash: stored.path_set_hash,
                    },
                    ttl,
                ));
            }
        }
    }

    /// Enumerate candidates for `weak`, merging the entries this cache
    /// remembers with whatever the delegate store still has.
    #[instrument(skip(self, hints))]
    pub async fn list_published_by_weak(
        &self,
        weak: &WeakFingerprint,
        hints: &LookupHints,
    ) -> Result<Vec<PublishedEntryRef>, HistoricError> {
        self.ensure_loaded().await?;
        self.accessed_this_session.store(true, Ordering::Release);

        let mut out = Vec::new();
        if let Some(stack) = self.weak_stacks.get(weak) {
            let stack = stack.lock();
            for expirable in stack.iter().rev() {
                let fingerprint = Fingerprint::new(weak, &expirable.value.strong);
                if self.full_fingerprint_to_metadata.contains_key(&fingerprint) {
                    out.push(PublishedEntryRef {
                        path_set_hash: expirable.value.path_set_hash,
                        strong: expirable.value.strong,
                        originating_cache_id: "historic".to_string(),
                        locality: Locality::Local,
                    });
                }
            }
        }
        out.extend(self.delegate.list_published(weak, hints).await?);
        Ok(out)
    }

    /// Resolve one `(weak, pathSetHash, strong)` candidate, checking the
    /// in-memory index before falling through to the delegate store and
    /// adopting whatever it returns.
    #[instrument(skip(self, hints))]
    pub async fn try_get_cache_entry(
        &self,
        weak: &WeakFingerprint,
        path_set_hash: &PathSetHash,
        strong: &StrongFingerprint,
        hints: &LookupHints,
    ) -> Result<Option<CacheEntry>, HistoricError> {
        self.ensure_loaded().await?;
        self.accessed_this_session.store(true, Ordering::Release);

        let fingerprint = Fingerprint::new(weak, strong);
        if let Some(metadata_hash) = self.full_fingerprint_to_metadata.get(&fingerprint).map(|v| *v) {
            self.refresh_entry(weak, strong, path_set_hash);
            return Ok(Some(CacheEntry {
                metadata_hash,
                originating_cache_id: "historic".to_string(),
                referenced_content_hashes: vec![],
            }));
        }

        let result = self
            .delegate
            .try_get_cache_entry(weak, path_set_hash, strong, hints)
            .await?;
        if let Some(entry) = &result {
            self.full_fingerprint_to_metadata.insert(fingerprint, entry.metadata_hash);
            self.refresh_entry(weak, strong, path_set_hash);
            self.new_full_fingerprints.insert(fingerprint);
        }
        Ok(result)
    }

    fn refresh_entry(&self, weak: &WeakFingerprint, strong: &StrongFingerprint, path_set_hash: &PathSetHash) {
        let slot = self.weak_stacks.entry(*weak).or_default();
        slot.lock().push(Expirable::new(
            PublishedEntry {
                strong: *strong,
                path_set_hash: *path_set_hash,
            },
            self.config.default_ttl,
        ));
    }

    /// Deserialize the value stored under `metadata_hash`, checking the
    /// local Content column before delegating to the content store and
    /// copying in whatever it returns.
    #[instrument(skip(self))]
    pub async fn try_retrieve_metadata<T>(
        &self,
        metadata_hash: &forge_types::ContentHash,
    ) -> Result<T, HistoricError>
    where
        T: DeserializeOwned + Serialize + PossiblyCorrupted + Send + Sync,
    {
        self.ensure_loaded().await?;
        self.accessed_this_session.store(true, Ordering::Release);

        if let Some(value) = self.try_read_content_column::<T>(metadata_hash) {
            return Ok(value);
        }

        let value: T = self
            .content
            .load_and_deserialize(metadata_hash, RetryPolicy::default())
            .await?;
        self.copy_into_content(metadata_hash, &value)?;
        Ok(value)
    }

    /// Load and deserialize the pathset stored under `path_set_hash`,
    /// treated as an ordinary content hash for the Content column.
    #[instrument(skip(self))]
    pub async fn try_load_pathset(&self, path_set_hash: &PathSetHash) -> Result<ObservedPathSet, HistoricError> {
        self.ensure_loaded().await?;
        self.accessed_this_session.store(true, Ordering::Release);

        let hash = forge_types::ContentHash::from_raw(*path_set_hash.raw());
        if let Some(value) = self.try_read_content_column::<ObservedPathSet>(&hash) {
            return Ok(value);
        }

        let value: ObservedPathSet = self.content.load_and_deserialize(&hash, RetryPolicy::default()).await?;
        self.copy_into_content(&hash, &value)?;
        Ok(value)
    }

    fn try_read_content_column<T>(&self, hash: &forge_types::ContentHash) -> Option<T>
    where
        T: DeserializeOwned + PossiblyCorrupted,
    {
        let backend = self.backend.as_ref()?;
        let bytes = backend.content.get(hash.raw().as_bytes()).ok().flatten()?;
        let value = rmp_serde::from_slice::<T>(&bytes).ok()?;
        if value.is_corrupted() {
            return None;
        }
        self.existing_content_entries.insert(hash.short_code());
        Some(value)
    }

    fn copy_into_content<T: Serialize>(
        &self,
        hash: &forge_types::ContentHash,
        value: &T,
    ) -> Result<(), HistoricError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        let bytes = rmp_serde::to_vec(value)?;
        backend.content.insert(hash.raw().as_bytes(), bytes)?;
        self.new_content_entries.insert(*hash);
        self.retained_content_hash_codes.insert(hash.short_code());
        self.existing_content_entries.insert(hash.short_code());
        Ok(())
    }

    /// Resolve a remapped content hash, probing the active column and
    /// falling back to the inactive one, copying a hit forward so the
    /// next lookup finds it in the active column directly.
    #[instrument(skip(self))]
    pub async fn remap_get(
        &self,
        hash_type: HashType,
        source: &forge_types::ContentHash,
    ) -> Result<Option<forge_types::ContentHash>, HistoricError> {
        self.ensure_loaded().await?;
        let Some(backend) = &self.backend else {
            return Ok(None);
        };
        let active = self.active_remap_column.load(Ordering::Acquire) as usize;
        let key = remap_key(hash_type, source);

        if let Some(bytes) = backend.remap[active].get(&key)? {
            return Ok(bytes_to_content_hash(&bytes));
        }
        let inactive = 1 - active;
        if let Some(bytes) = backend.remap[inactive].get(&key)? {
            backend.remap[active].insert(key, bytes.to_vec())?;
            return Ok(bytes_to_content_hash(&bytes));
        }
        Ok(None)
    }

    #[instrument(skip(self))]
    pub async fn remap_put(
        &self,
        hash_type: HashType,
        source: &forge_types::ContentHash,
        target: &forge_types::ContentHash,
    ) -> Result<(), HistoricError> {
        self.ensure_loaded().await?;
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        let active = self.active_remap_column.load(Ordering::Acquire) as usize;
        let key = remap_key(hash_type, source);
        backend.remap[active].insert(key, target.raw().as_bytes().to_vec())?;
        Ok(())
    }

    /// Start the Content-column garbage collector as a background task,
    /// resumable from a persisted cursor and cooperatively cancellable.
    /// The caller is expected to hold the returned handle or rely on
    /// [`Self::close`] to cancel and await it.
    pub fn spawn_gc(self: &Arc<Self>) -> tokio::task::JoinHandle<()>
    where
        C: 'static,
        S: 'static,
    {
        let me = Arc::clone(self);
        let handle = tokio::spawn(async move {
            me.run_gc().await;
        });
        handle
    }

    async fn run_gc(&self) {
        let Some(backend) = &self.backend else {
            return;
        };
        let start = backend
            .db
            .get(GC_CURSOR_KEY)
            .ok()
            .flatten()
            .map(|v| v.to_vec())
            .unwrap_or_default();

        let mut last_key: Option<Vec<u8>> = None;
        let mut cancelled = false;
        let mut processed = 0usize;

        for item in backend.content.range(start..) {
            if self.gc_cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let Ok((key, _value)) = item else { continue };
            last_key = Some(key.to_vec());

            if key.len() == HASH_LEN {
                let short = u32::from_le_bytes([key[0], key[1], key[2], key[3]]);
                if self.retained_content_hash_codes.contains(&short) {
                    self.existing_content_entries.insert(short);
                } else {
                    let _ = backend.content.remove(&key);
                }
            } else {
                let _ = backend.content.remove(&key);
            }

            processed += 1;
            if processed >= GC_CHUNK_SIZE {
                processed = 0;
                tokio::task::yield_now().await;
            }
        }

        if cancelled {
            if let Some(key) = last_key {
                let _ = backend.db.insert(GC_CURSOR_KEY, key.clone());
                forge_events::content_garbage_collection_cancelled(&data_encoding::HEXLOWER.encode(&key));
            }
        } else {
            let _ = backend.db.remove(GC_CURSOR_KEY);
        }
    }

    /// Cancel and await any running GC, then save. Idempotent: calling
    /// `close` twice just saves twice (the second save is a no-op unless
    /// something was accessed in between).
    pub async fn close(&self) -> Result<(), HistoricError> {
        self.ensure_loaded().await?;
        self.gc_cancel.cancel();
        if let Some(handle) = self.gc_handle.lock().take() {
            let _ = handle.await;
        }
        self.save().await
    }

    async fn save(&self) -> Result<(), HistoricError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        if !self.accessed_this_session.load(Ordering::Acquire) {
            return Ok(());
        }

        for hash in self.new_content_entries.iter() {
            self.existing_content_entries.insert(hash.short_code());
        }

        let total_groups = self.weak_stacks.len();
        let fully_expired_groups = self
            .weak_stacks
            .iter()
            .filter(|e| {
                let stack = e.value().lock();
                !stack.is_empty() && stack.iter().all(|entry| entry.is_expired())
            })
            .count();
        let purge_expired = self.config.proactive_purging
            || (total_groups > 0 && fully_expired_groups * 2 >= total_groups);

        let mut groups = Vec::new();
        for entry in self.weak_stacks.iter() {
            let weak = *entry.key();
            let stack = entry.value().lock();

            let mut seen = std::collections::HashSet::new();
            let mut kept = Vec::new();
            for expirable in stack.iter().rev() {
                if purge_expired && expirable.is_expired() {
                    continue;
                }
                let key = (expirable.value.strong, expirable.value.path_set_hash);
                if !seen.insert(key) {
                    continue;
                }
                let fingerprint = Fingerprint::new(&weak, &expirable.value.strong);
                let Some(metadata_hash) = self.full_fingerprint_to_metadata.get(&fingerprint).map(|v| *v) else {
                    continue;
                };
                if !self.existing_content_entries.contains(&metadata_hash.short_code())
                    || !self
                        .existing_content_entries
                        .contains(&expirable.value.path_set_hash.raw().short_code())
                {
                    continue;
                }
                kept.push(PersistedStrongEntry {
                    strong: expirable.value.strong,
                    path_set_hash: expirable.value.path_set_hash,
                    metadata_hash,
                    ttl: expirable.ttl,
                });
                if kept.len() >= self.config.default_ttl as usize {
                    break;
                }
            }
            if kept.is_empty() {
                continue;
            }
            kept.sort_by_key(|e| e.ttl);

            let semistable_hash = self.weak_to_semistable.get(&weak).map(|v| *v).unwrap_or(0);
            groups.push(PersistedWeakGroup {
                weak,
                semistable_hash,
                entries: kept,
            });
        }

        let blob = rmp_serde::to_vec(&PersistedEntries { groups })?;
        backend.db.insert(ENTRIES_KEY, blob)?;
        backend.db.flush_async().await?;
        Ok(())
    }

    /// The semistable hash recorded for `weak`, if any build has
    /// published under it before.
    pub fn semistable_hash_for(&self, weak: &WeakFingerprint) -> Option<u64> {
        self.weak_to_semistable.get(weak).map(|v| *v)
    }

    /// Record the semistable hash a weak fingerprint was published under,
    /// maintaining the bidirectional index.
    pub fn record_semistable_hash(&self, weak: WeakFingerprint, semistable_hash: u64) {
        self.semistable_to_weak.insert(semistable_hash, weak);
        self.weak_to_semistable.insert(weak, semistable_hash);
    }

    pub fn weak_for_semistable_hash(&self, semistable_hash: u64) -> Option<WeakFingerprint> {
        self.semistable_to_weak.get(&semistable_hash).map(|v| *v)
    }
}
