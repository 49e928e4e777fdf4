//! The engine facade: wires the leaf components into one data flow —
//! weak fingerprint in, materialized outputs out — with the historic
//! cache accelerating repeat lookups and the file-hash registry
//! reconciling what actually got produced.
//!
//! This crate owns no policy of its own. Every method is a thin pipeline
//! over the component it names; the interesting behavior lives in
//! `forge-historic`, `forge-materialize`, and friends. What this crate
//! adds is construction (one `Arc` per component, wired together once)
//! and a handful of cross-component sequences (`publish`, `retrieve`)
//! that read as a single step from the outside but span two or three
//! crates underneath.

mod config;

pub use config::EngineConfig;

use std::path::Path;
use std::sync::Arc;

use forge_content::{ContentStore, LocalContentStore};
use forge_filehash::FileHashRegistry;
use forge_historic::HistoricMetadataCache;
use forge_materialize::{MaterializationCoordinator, MaterializeReport, MaterializeRequest};
use forge_pipcache::PublishResult;
use forge_result::ExecutionResult;
use forge_seals::SealRegistry;
use forge_twophase::{LocalTwoPhaseStore, LookupHints, TwoPhaseFingerprintStore};
use forge_types::{
    CacheEntry, ContentHash, ObservedPathSet, PathSetHash, PublishMode, PublishedEntryRef,
    StrongFingerprint, WeakFingerprint,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// One `(weak, pathSetHash, strong)` candidate resolved to its cache
/// entry and deserialized metadata.
pub struct CacheHit<T> {
    pub entry: CacheEntry,
    pub metadata: T,
}

/// Everything the leaf components need, wired once per build. Generic
/// over the content store and two-phase store so a caller can swap in a
/// remote implementation behind the same traits; [`Engine::open_local`]
/// is the standalone, fully-local convenience constructor.
pub struct Engine<C: ContentStore, S: TwoPhaseFingerprintStore> {
    pub content: Arc<C>,
    pub two_phase: Arc<S>,
    pub historic: Arc<HistoricMetadataCache<C, S>>,
    pub seals: Arc<SealRegistry>,
    pub file_hashes: Arc<FileHashRegistry>,
    pub materialize: Arc<MaterializationCoordinator<C>>,
    config: EngineConfig,
}

impl<C: ContentStore, S: TwoPhaseFingerprintStore> Engine<C, S> {
    /// Wire up one engine instance over caller-supplied content and
    /// two-phase stores. `historic_dir` is the on-disk root for C4's KV
    /// store.
    pub fn open(historic_dir: impl AsRef<Path>, content: Arc<C>, two_phase: Arc<S>, config: EngineConfig) -> Self {
        let seals = Arc::new(SealRegistry::new());
        let file_hashes = Arc::new(FileHashRegistry::new(config.conflict_policy));
        let historic = Arc::new(HistoricMetadataCache::open(
            historic_dir,
            config.historic,
            Arc::clone(&content),
            Arc::clone(&two_phase),
        ));
        let materialize = Arc::new(MaterializationCoordinator::new(
            Arc::clone(&content),
            Arc::clone(&file_hashes),
            Arc::clone(&seals),
            config.materialize,
        ));
        Self {
            content,
            two_phase,
            historic,
            seals,
            file_hashes,
            materialize,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Enumerate and deduplicate published candidates for `weak`, merging whatever the historic cache
    /// remembers in memory with what the delegate store still has.
    pub async fn candidates(&self, weak: &WeakFingerprint, hints: &LookupHints) -> anyhow::Result<Vec<PublishedEntryRef>> {
        let entries = self.historic.list_published_by_weak(weak, hints).await?;
        Ok(forge_twophase::dedupe_published(entries))
    }

    /// Resolve one candidate to its cache entry and deserialized
    /// metadata, going through the historic cache so a repeat lookup in
    /// the same run is served from memory.
    pub async fn retrieve<T>(
        &self,
        weak: &WeakFingerprint,
        path_set_hash: &PathSetHash,
        strong: &StrongFingerprint,
    ) -> anyhow::Result<Option<CacheHit<T>>>
    where
        T: DeserializeOwned + Serialize + forge_content::PossiblyCorrupted + Send + Sync,
    {
        let hints = LookupHints::default();
        let Some(entry) = self.historic.try_get_cache_entry(weak, path_set_hash, strong, &hints).await? else {
            return Ok(None);
        };
        let metadata = self.historic.try_retrieve_metadata::<T>(&entry.metadata_hash).await?;
        Ok(Some(CacheHit { entry, metadata }))
    }

    /// Load the pathset a candidate's `pathSetHash` addresses.
    pub async fn load_pathset(&self, path_set_hash: &PathSetHash) -> anyhow::Result<ObservedPathSet> {
        Ok(self.historic.try_load_pathset(path_set_hash).await?)
    }

    /// Serialize and publish one pip's result to the two-phase store
    ///. The historic cache is read-through, not
    /// write-through: it picks this entry up the next time
    /// [`Self::retrieve`] misses locally and falls through to the
    /// delegate, rather than being told about it here directly.
    pub async fn publish<T>(
        &self,
        weak: &WeakFingerprint,
        strong: &StrongFingerprint,
        pathset: &ObservedPathSet,
        metadata: &T,
        originating_cache_id: impl Into<String>,
        referenced_content_hashes: Vec<ContentHash>,
        mode: PublishMode,
    ) -> anyhow::Result<PublishResult>
    where
        T: Serialize + Sync,
    {
        Ok(forge_pipcache::publish(
            self.content.as_ref(),
            self.two_phase.as_ref(),
            weak,
            strong,
            pathset,
            metadata,
            originating_cache_id,
            referenced_content_hashes,
            mode,
        )
        .await?)
    }

    /// Materialize a batch of declared dependencies, the C7
    /// step of the data flow.
    pub async fn materialize_dependencies(&self, request: MaterializeRequest) -> MaterializeReport {
        self.materialize.materialize_dependencies(request).await
    }

    /// Reconcile a reported output hash into the file-hash registry
    ///, the C6 step that absorbs an execution's produced content.
    pub fn report_output(
        &self,
        file: forge_types::FileArtifact,
        info: forge_types::FileMaterializationInfo,
        origin: forge_types::Origin,
    ) -> Result<forge_filehash::ReportOutcome, forge_filehash::FileHashError> {
        self.file_hashes.report_content(file, info, origin)
    }

    /// Hash a local source file and compare it against an expected state
    ///, the C8 step.
    pub fn verify_source(
        &self,
        path: &forge_types::AbsolutePath,
        expected: forge_verify::ExpectedState,
    ) -> Result<forge_verify::VerificationOutcome, forge_verify::VerifyError> {
        forge_verify::verify_source_file(path, expected)
    }

    /// Start a fresh, unsealed execution-result carrier. Populating
    /// and sealing it is the caller's (scheduler's) responsibility; this
    /// crate only supplies the empty carrier so one import covers all of
    /// C1–C9.
    pub fn new_execution_result(&self) -> ExecutionResult {
        ExecutionResult::new()
    }

    /// The cancellation token every materialization suspension point in
    /// this engine observes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.materialize.cancellation_token()
    }

    /// Start the historic cache's background GC sweep. Returns
    /// the task handle so the caller can abort it on shutdown.
    pub fn spawn_historic_gc(&self) -> tokio::task::JoinHandle<()> {
        self.historic.spawn_gc()
    }

    /// Persist the historic cache's in-memory state to its KV store
    ///, aging every retained TTL down by one.
    pub async fn close(&self) -> anyhow::Result<()> {
        self.historic.close().await?;
        Ok(())
    }
}

/// Convenience constructor good enough to run and test this engine
/// standalone, without a real remote content or two-phase store.
impl Engine<LocalContentStore, LocalTwoPhaseStore> {
    pub fn open_local(root: impl AsRef<Path>, config: EngineConfig) -> std::io::Result<Self> {
        let root = root.as_ref();
        let content = Arc::new(LocalContentStore::new(root.join("cas"))?);
        let two_phase = Arc::new(LocalTwoPhaseStore::new());
        Ok(Self::open(root.join("historic"), content, two_phase, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_types::{AbsolutePath, FileArtifact, FileMaterializationInfo, ObservationFlags, Origin};
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Metadata {
        exit_code: i32,
    }

    impl forge_content::PossiblyCorrupted for Metadata {}

    fn sample_pathset() -> ObservedPathSet {
        let mut pathset = ObservedPathSet::new();
        pathset.push(AbsolutePath::new("/src/main.rs"), ObservationFlags::CONTENT);
        pathset
    }

    #[tokio::test]
    async fn publish_then_retrieve_goes_through_the_historic_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Engine::open_local(tmp.path(), EngineConfig::default()).unwrap();

        let weak = WeakFingerprint::from_bytes(b"weak");
        let strong = StrongFingerprint::from_bytes(b"strong");
        let pathset = sample_pathset();
        let metadata = Metadata { exit_code: 0 };

        let published = engine
            .publish(&weak, &strong, &pathset, &metadata, "local", vec![], PublishMode::CreateNew)
            .await
            .unwrap();
        let PublishResult::Published { path_set_hash, .. } = published else {
            panic!("expected a fresh publish");
        };

        let hit: CacheHit<Metadata> = engine
            .retrieve(&weak, &path_set_hash, &strong)
            .await
            .unwrap()
            .expect("published entry should be retrievable");
        assert_eq!(hit.metadata, metadata);

        let loaded_pathset = engine.load_pathset(&path_set_hash).await.unwrap();
        assert_eq!(loaded_pathset, pathset);

        let candidates = engine.candidates(&weak, &LookupHints::default()).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].strong, strong);
    }

    #[tokio::test]
    async fn materialize_places_content_reported_through_the_engine() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Engine::open_local(tmp.path(), EngineConfig::default()).unwrap();

        let hash = engine.content.store_bytes(b"engine output", None).await.unwrap();
        let target = tmp.path().join("out.txt");
        let file = FileArtifact::output(AbsolutePath::new(&target), 1);
        engine
            .report_output(
                file.clone(),
                FileMaterializationInfo::new(hash).with_length(13),
                Origin::NotMaterialized,
            )
            .unwrap();

        let report = engine
            .materialize_dependencies(MaterializeRequest {
                inputs: vec![forge_materialize::MaterializationInput::File(file.clone())],
                dynamic_directories: vec![],
                hydrate_reads: vec![],
                policy: forge_materialize::MaterializePolicy::default(),
            })
            .await;

        assert_eq!(report.origins.get(&file), Some(&Ok(Origin::DeployedFromCache)));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "engine output");
    }

    #[tokio::test]
    async fn close_persists_the_historic_cache_for_the_next_open() {
        let tmp = tempfile::tempdir().unwrap();
        let config = EngineConfig::default();
        let engine = Engine::open_local(tmp.path(), config).unwrap();

        let weak = WeakFingerprint::from_bytes(b"weak");
        let strong = StrongFingerprint::from_bytes(b"strong");
        engine
            .publish(&weak, &strong, &sample_pathset(), &Metadata { exit_code: 0 }, "local", vec![], PublishMode::CreateNew)
            .await
            .unwrap();
        // Touch the entry once so the historic cache has something to retain.
        let candidates = engine.candidates(&weak, &LookupHints::default()).await.unwrap();
        let path_set_hash = candidates[0].path_set_hash;
        engine.retrieve::<Metadata>(&weak, &path_set_hash, &strong).await.unwrap();
        engine.close().await.unwrap();

        let reopened = Engine::open_local(tmp.path(), config).unwrap();
        let candidates = reopened.candidates(&weak, &LookupHints::default()).await.unwrap();
        assert_eq!(candidates.len(), 1);
    }
}
