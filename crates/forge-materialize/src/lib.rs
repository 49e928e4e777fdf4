//! The materialization coordinator: delete-then-place pipeline with
//! per-path reservations, dynamic (opaque) directory cleanup, content
//! recovery for hashes the content store doesn't have on hand, and
//! virtualization/hydration bookkeeping.
//!
//! Collaborates with the artifact content cache,
//! the sealed-directory registry, the file-hash
//! registry, and the source-file verifier.

mod config;
mod directories;
mod error;
mod recovery;
mod reservation;
mod virtualization;

pub use config::MaterializeConfig;
pub use directories::prepare_opaque_directory;
pub use error::MaterializeError;
pub use recovery::{recover_content, RecoveryOutcome, RecoveryPolicy};
pub use reservation::{try_reserve, Completion, Reservation, Reserver};
pub use virtualization::{VirtualizationState, VirtualizationTracker};

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use forge_content::{ContentStore, ContentStoreExt, RealizationMode};
use forge_filehash::FileHashRegistry;
use forge_seals::SealRegistry;
use forge_types::{
    AbsolutePath, ContentHash, DirectoryArtifact, FileArtifact, Origin, WellKnownContentHashes,
};
use fs_err as fs;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// One declared input to a materialization batch.
#[derive(Debug, Clone)]
pub enum MaterializationInput {
    File(FileArtifact),
    SealedDirectory(DirectoryArtifact),
}

/// A dynamic output directory to prepare ahead of placing its contents.
#[derive(Debug, Clone)]
pub struct DynamicDirectoryRequest {
    pub directory: DirectoryArtifact,
    pub preserve_existing_outputs: bool,
}

/// Policy inputs shared by every file in a batch. Per-pip variance (e.g.
/// distributed-worker verification only applying to some pips) is the
/// caller's responsibility to split into separate batches.
#[derive(Debug, Clone, Copy)]
pub struct MaterializePolicy {
    pub reuse_outputs_on_disk: bool,
    pub preserve_outputs: bool,
    pub outputs_not_stored_to_cache: bool,
    pub allow_virtualization: bool,
    /// §4.8: hash and compare each source file before placing anything,
    /// as a distributed worker would.
    pub verify_source_files: bool,
}

impl Default for MaterializePolicy {
    fn default() -> Self {
        Self {
            reuse_outputs_on_disk: false,
            preserve_outputs: false,
            outputs_not_stored_to_cache: false,
            allow_virtualization: false,
            verify_source_files: false,
        }
    }
}

/// One materialization request.
#[derive(Debug, Clone)]
pub struct MaterializeRequest {
    pub inputs: Vec<MaterializationInput>,
    pub dynamic_directories: Vec<DynamicDirectoryRequest>,
    /// Paths the host's historical read-tracking marked as read, used to
    /// transition virtualized files into the hydration queue.
    pub hydrate_reads: Vec<AbsolutePath>,
    pub policy: MaterializePolicy,
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct MaterializeReport {
    pub origins: HashMap<FileArtifact, Result<Origin, MaterializeError>>,
    pub failed_directories: Vec<DirectoryArtifact>,
}

/// Per-path reservation discipline plus the concurrency limits described
/// in §5.
pub struct MaterializationCoordinator<C: ContentStore> {
    content: Arc<C>,
    file_hashes: Arc<FileHashRegistry>,
    seals: Arc<SealRegistry>,
    config: MaterializeConfig,

    materialization_tasks: DashMap<FileArtifact, Completion<Result<Origin, MaterializeError>>>,
    dynamic_directory_deletion_tasks: DashMap<DirectoryArtifact, Completion<Result<bool, MaterializeError>>>,
    currently_materializing_files_by_path: DashMap<AbsolutePath, FileArtifact>,
    materialized_directories: dashmap::DashSet<DirectoryArtifact>,
    virtualization: VirtualizationTracker,

    placement_semaphore: Semaphore,
    recovery_semaphore: Semaphore,
    cancellation: CancellationToken,
}

impl<C: ContentStore> MaterializationCoordinator<C> {
    pub fn new(
        content: Arc<C>,
        file_hashes: Arc<FileHashRegistry>,
        seals: Arc<SealRegistry>,
        config: MaterializeConfig,
    ) -> Self {
        Self {
            content,
            file_hashes,
            seals,
            placement_semaphore: Semaphore::new(config.concurrency as usize),
            recovery_semaphore: Semaphore::new(config.recovery_concurrency as usize),
            config,
            materialization_tasks: DashMap::new(),
            dynamic_directory_deletion_tasks: DashMap::new(),
            currently_materializing_files_by_path: DashMap::new(),
            materialized_directories: dashmap::DashSet::new(),
            virtualization: VirtualizationTracker::new(),
            cancellation: CancellationToken::new(),
        }
    }

    /// The cancellation token every suspension point in this coordinator
    /// observes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Let a host's historical read-path tracker seed a path as already
    /// virtual before a batch runs.
    pub fn mark_virtual(&self, path: AbsolutePath) {
        self.virtualization.set(path, VirtualizationState::Virtual);
    }

    pub fn is_directory_materialized(&self, dir: &DirectoryArtifact) -> bool {
        self.materialized_directories.contains(dir)
    }

    /// Run the full materialize-dependencies pipeline over one
    /// batch of declared inputs.
    pub async fn materialize_dependencies(&self, request: MaterializeRequest) -> MaterializeReport {
        let mut report = MaterializeReport::default();

        // Step 1: populate the to-materialize set and the dynamic
        // directories that must be cleared first.
        let mut to_materialize: Vec<FileArtifact> = Vec::new();
        for input in &request.inputs {
            match input {
                MaterializationInput::File(file) => to_materialize.push(file.clone()),
                MaterializationInput::SealedDirectory(dir) => {
                    to_materialize.extend(self.seals.list_contents(dir));
                }
            }
        }

        // Step 2: populate the hydration set.
        if request.policy.allow_virtualization {
            for path in &request.hydrate_reads {
                self.virtualization.mark_read(path);
            }
        }

        // Step 3: prepare directories. Each reservation signals its own
        // completion on every exit path, including cancellation.
        for prep in &request.dynamic_directories {
            let outcome = self.prepare_dynamic_directory(prep).await;
            if outcome.is_err() {
                report.failed_directories.push(prep.directory.clone());
            }
        }

        // Step 4: verify source files (distributed-worker mode only).
        if request.policy.verify_source_files {
            to_materialize.retain(|file| {
                if !file.is_source() {
                    return true;
                }
                let Ok(info) = self.file_hashes.get_input_content(file) else {
                    return true;
                };
                let expected = forge_verify::ExpectedState::Exists(info.content_hash);
                match forge_verify::verify_source_file(&file.path, expected) {
                    Ok(forge_verify::VerificationOutcome::Matched) => true,
                    Ok(forge_verify::VerificationOutcome::Mismatched) => {
                        report.origins.insert(
                            file.clone(),
                            Err(MaterializeError::VerificationMismatch(
                                file.path.as_path().display().to_string(),
                            )),
                        );
                        false
                    }
                    Err(err) => {
                        report.origins.insert(
                            file.clone(),
                            Err(MaterializeError::io(file.path.as_path().display().to_string(), &io_error_of(&err))),
                        );
                        false
                    }
                }
            });
        }

        // Step 5: delete absent files.
        to_materialize.retain(|file| {
            let Ok(info) = self.file_hashes.get_input_content(file) else {
                return true;
            };
            if info.content_hash != WellKnownContentHashes::absent_file() {
                return true;
            }
            let target = file.path.as_path();
            if target.exists() {
                if let Err(err) = fs::remove_file(target) {
                    report.origins.insert(
                        file.clone(),
                        Err(MaterializeError::Io {
                            path: target.display().to_string(),
                            message: err.to_string(),
                        }),
                    );
                    return false;
                }
                let _ = self.file_hashes.report_content(file.clone(), info, Origin::DeployedFromCache);
                report.origins.insert(file.clone(), Ok(Origin::DeployedFromCache));
            } else {
                let _ = self.file_hashes.report_content(file.clone(), info, Origin::UpToDate);
                report.origins.insert(file.clone(), Ok(Origin::UpToDate));
            }
            false
        });

        // Step 6: batch-load availability, recovering what's missing.
        let hashes: Vec<ContentHash> = to_materialize
            .iter()
            .filter_map(|file| self.file_hashes.get_input_content(file).ok().map(|i| i.content_hash))
            .collect();
        if !hashes.is_empty() {
            if let Ok(availability) = self.content.load_available(&hashes).await {
                for (hash, status) in &availability.per_hash {
                    if status.available {
                        continue;
                    }
                    let unavailable_files: Vec<FileArtifact> = to_materialize
                        .iter()
                        .filter(|file| {
                            self.file_hashes
                                .get_input_content(file)
                                .is_ok_and(|i| i.content_hash == *hash)
                        })
                        .cloned()
                        .collect();
                    let recovered = self.recover_hash(*hash, &unavailable_files, &request.policy).await;
                    if !recovered {
                        for file in unavailable_files {
                            forge_events::failed_to_load_file_content_warning(&file.path, hash);
                            report
                                .origins
                                .insert(file.clone(), Err(MaterializeError::Unavailable(*hash)));
                        }
                        to_materialize.retain(|file| {
                            self.file_hashes
                                .get_input_content(file)
                                .is_ok_and(|i| i.content_hash != *hash)
                        });
                    }
                }
            }
        }

        // Step 7: place remaining files, bounded by the global semaphore.
        // Sorted by `FileArtifact` order (path, then ascending rewrite count)
        // so a prior rewrite's reservation always exists by the time a
        // later one polls for it in the I2 await below — `join_all` polls
        // this vec in order, and reservations are created lazily on first
        // poll, so an unsorted batch could place a higher rewrite count
        // before its prior ever reserves.
        to_materialize.sort();
        let mut placements = Vec::with_capacity(to_materialize.len());
        for file in to_materialize {
            if report.origins.contains_key(&file) {
                continue;
            }
            placements.push(self.place_file_reserved(file, &request.policy));
        }
        let placed = futures::future::join_all(placements).await;
        for (file, result) in placed {
            report.origins.insert(file, result);
        }

        // Step 8: hydrate.
        if request.policy.allow_virtualization {
            for path in self.virtualization.pending_hydration() {
                if self.force_hydration_read(&path).is_ok() {
                    forge_events::pip_hydrated_file(&path);
                    self.virtualization.mark_hydrated(&path);
                }
            }
        }

        // Step 9: mark fully covered dynamic directories materialized.
        for prep in &request.dynamic_directories {
            if !report.failed_directories.contains(&prep.directory) {
                self.materialized_directories.insert(prep.directory.clone());
            }
        }

        report
    }

    async fn prepare_dynamic_directory(&self, prep: &DynamicDirectoryRequest) -> Result<bool, MaterializeError> {
        match try_reserve(&self.dynamic_directory_deletion_tasks, prep.directory.clone()) {
            Reservation::Observed(completion) => match self.wait_cancellable(&completion).await {
                Some(result) => result,
                None => Err(MaterializeError::Cancelled),
            },
            Reservation::Reserved(reserver, completion) => {
                let result = if self.cancellation.is_cancelled() {
                    Err(MaterializeError::Cancelled)
                } else {
                    let declared_contents = self.seals.list_contents(&prep.directory);
                    prepare_opaque_directory(&prep.directory, &declared_contents, prep.preserve_existing_outputs)
                };
                reserver.complete(result.clone());
                match self.wait_cancellable(&completion).await {
                    Some(r) => r,
                    None => Err(MaterializeError::Cancelled),
                }
            }
        }
    }

    async fn recover_hash(&self, hash: ContentHash, files: &[FileArtifact], policy: &MaterializePolicy) -> bool {
        let Ok(_permit) = self.recovery_semaphore.acquire().await else {
            return false;
        };
        let recovery_policy = RecoveryPolicy {
            preserve_outputs: policy.preserve_outputs,
            outputs_not_stored_to_cache: policy.outputs_not_stored_to_cache,
        };
        for file in files {
            let target = file.path.as_path();
            if let Ok(RecoveryOutcome::Recovered(_)) =
                recover_content(self.content.as_ref(), &self.file_hashes, hash, target, recovery_policy).await
            {
                return true;
            }
        }
        false
    }

    /// Reserve, place, and complete one file's materialization, returning
    /// it alongside the file so the caller can fold results back by key
    /// after `join_all`.
    async fn place_file_reserved(
        &self,
        file: FileArtifact,
        policy: &MaterializePolicy,
    ) -> (FileArtifact, Result<Origin, MaterializeError>) {
        match try_reserve(&self.materialization_tasks, file.clone()) {
            Reservation::Observed(completion) => {
                let result = match self.wait_cancellable(&completion).await {
                    Some(r) => r,
                    None => Err(MaterializeError::Cancelled),
                };
                (file, result)
            }
            Reservation::Reserved(reserver, completion) => {
                let result = self.place_file(&file, policy).await;
                reserver.complete(result.clone());
                let result = match self.wait_cancellable(&completion).await {
                    Some(r) => r,
                    None => Err(MaterializeError::Cancelled),
                };
                (file, result)
            }
        }
    }

    async fn place_file(&self, file: &FileArtifact, policy: &MaterializePolicy) -> Result<Origin, MaterializeError> {
        if self.cancellation.is_cancelled() {
            return Err(MaterializeError::Cancelled);
        }
        let Ok(_permit) = self.placement_semaphore.acquire().await else {
            return Err(MaterializeError::Cancelled);
        };

        // I2: the materialization of rewrite-count N+1 awaits rewrite-count N.
        if file.rewrite_count > 0 {
            let prior = FileArtifact {
                path: file.path.clone(),
                rewrite_count: file.rewrite_count - 1,
            };
            if let Some(completion) = self.materialization_tasks.get(&prior).map(|entry| entry.clone()) {
                match self.wait_cancellable(&completion).await {
                    Some(_) => {}
                    None => return Err(MaterializeError::Cancelled),
                }
            }
        }

        // Dynamic-directory deletion precedes any placement into it.
        if let Some(dir) = self.seals.dynamic_directory_of(file) {
            if let Some(completion) = self.dynamic_directory_deletion_tasks.get(&dir).map(|entry| entry.clone()) {
                match self.wait_cancellable(&completion).await {
                    Some(Ok(true)) => {}
                    Some(Ok(false)) | Some(Err(_)) => {
                        return Err(MaterializeError::DirectoryPrepFailed {
                            path: dir.path.as_path().display().to_string(),
                            message: "directory preparation did not complete successfully".to_string(),
                        });
                    }
                    None => return Err(MaterializeError::Cancelled),
                }
            }
        }

        self.currently_materializing_files_by_path
            .insert(file.path.clone(), file.clone());

        let info = self.file_hashes.get_input_content(file)?;
        let target = file.path.as_path();

        let reuse_in_place =
            policy.reuse_outputs_on_disk || policy.preserve_outputs || policy.outputs_not_stored_to_cache;
        if reuse_in_place {
            if let Ok(bytes) = fs::read(target) {
                if ContentHash::from_bytes(&bytes) == info.content_hash {
                    let _ = self.file_hashes.report_content(file.clone(), info, Origin::UpToDate);
                    return Ok(Origin::UpToDate);
                }
            }
        }

        let realization_mode = if policy.preserve_outputs || info.is_executable {
            RealizationMode::Copy
        } else {
            RealizationMode::HardLinkOrCopy
        };

        let outcome = self
            .content
            .materialize(&info.content_hash, realization_mode, target, policy.allow_virtualization, true)
            .await?;

        if policy.allow_virtualization {
            self.virtualization
                .set(file.path.clone(), VirtualizationState::FullMaterialized);
        }

        self.file_hashes.report_content(file.clone(), info, outcome.origin)?;
        Ok(outcome.origin)
    }

    fn force_hydration_read(&self, path: &AbsolutePath) -> std::io::Result<()> {
        use std::io::Read;
        let mut file = std::fs::File::open(path.as_path())?;
        let mut buf = [0u8; 1];
        let _ = file.read(&mut buf)?;
        Ok(())
    }

    async fn wait_cancellable<V: Clone>(&self, completion: &Completion<V>) -> Option<V> {
        tokio::select! {
            biased;
            () = self.cancellation.cancelled() => None,
            value = completion.wait() => Some(value),
        }
    }
}

fn io_error_of(err: &forge_verify::VerifyError) -> std::io::Error {
    std::io::Error::other(err.to_string())
}

impl From<forge_verify::VerifyError> for MaterializeError {
    fn from(err: forge_verify::VerifyError) -> Self {
        Self::io("source verification", &io_error_of(&err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_content::LocalContentStore;
    use forge_types::{FileMaterializationInfo, PartialSealId, StreamingHasher};

    fn hash_of(bytes: &[u8]) -> ContentHash {
        let mut hasher = StreamingHasher::new();
        hasher.update(bytes);
        ContentHash::from_raw(hasher.finalize())
    }

    fn coordinator(
        tmp: &std::path::Path,
    ) -> MaterializationCoordinator<LocalContentStore> {
        let content = Arc::new(LocalContentStore::new(tmp.join("cas")).unwrap());
        let file_hashes = Arc::new(FileHashRegistry::new(forge_filehash::ConflictPolicy::Strict));
        let seals = Arc::new(SealRegistry::new());
        MaterializationCoordinator::new(content, file_hashes, seals, MaterializeConfig::default())
    }

    #[tokio::test]
    async fn places_an_absent_file_by_deleting_it() {
        let tmp = tempfile::tempdir().unwrap();
        let coordinator = coordinator(tmp.path());
        let target = tmp.path().join("stale.txt");
        fs::write(&target, b"old").unwrap();

        let file = FileArtifact::output(AbsolutePath::new(&target), 1);
        coordinator
            .file_hashes
            .report_content(
                file.clone(),
                FileMaterializationInfo::new(WellKnownContentHashes::absent_file()),
                Origin::NotMaterialized,
            )
            .unwrap();

        let report = coordinator
            .materialize_dependencies(MaterializeRequest {
                inputs: vec![MaterializationInput::File(file.clone())],
                dynamic_directories: vec![],
                hydrate_reads: vec![],
                policy: MaterializePolicy::default(),
            })
            .await;

        assert_eq!(report.origins.get(&file), Some(&Ok(Origin::DeployedFromCache)));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn absent_file_deletion_failure_is_reported_not_swallowed() {
        let tmp = tempfile::tempdir().unwrap();
        let coordinator = coordinator(tmp.path());
        // A directory at the target path makes `remove_file` fail (it is
        // not `remove_dir`), simulating a deletion that cannot go through.
        let target = tmp.path().join("stale_dir");
        fs::create_dir(&target).unwrap();

        let file = FileArtifact::output(AbsolutePath::new(&target), 1);
        coordinator
            .file_hashes
            .report_content(
                file.clone(),
                FileMaterializationInfo::new(WellKnownContentHashes::absent_file()),
                Origin::NotMaterialized,
            )
            .unwrap();

        let report = coordinator
            .materialize_dependencies(MaterializeRequest {
                inputs: vec![MaterializationInput::File(file.clone())],
                dynamic_directories: vec![],
                hydrate_reads: vec![],
                policy: MaterializePolicy::default(),
            })
            .await;

        assert!(matches!(report.origins.get(&file), Some(Err(MaterializeError::Io { .. }))));
        assert!(target.exists(), "failed deletion must not be reported as success");
    }

    #[tokio::test]
    async fn places_a_file_from_the_content_store() {
        let tmp = tempfile::tempdir().unwrap();
        let coordinator = coordinator(tmp.path());
        let hash = coordinator.content.store_bytes(b"produced bytes", None).await.unwrap();

        let target = tmp.path().join("out.txt");
        let file = FileArtifact::output(AbsolutePath::new(&target), 1);
        coordinator
            .file_hashes
            .report_content(
                file.clone(),
                FileMaterializationInfo::new(hash).with_length(14),
                Origin::NotMaterialized,
            )
            .unwrap();

        let report = coordinator
            .materialize_dependencies(MaterializeRequest {
                inputs: vec![MaterializationInput::File(file.clone())],
                dynamic_directories: vec![],
                hydrate_reads: vec![],
                policy: MaterializePolicy::default(),
            })
            .await;

        assert_eq!(report.origins.get(&file), Some(&Ok(Origin::DeployedFromCache)));
        assert_eq!(fs::read_to_string(&target).unwrap(), "produced bytes");
    }

    #[tokio::test]
    async fn opaque_directory_is_cleared_before_its_contents_are_placed() {
        let tmp = tempfile::tempdir().unwrap();
        let coordinator = coordinator(tmp.path());
        let root = tmp.path().join("opaque");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("stale.txt"), b"stale").unwrap();

        let dir = DirectoryArtifact {
            path: AbsolutePath::new(&root),
            partial_seal_id: PartialSealId(1),
            is_shared_opaque: false,
        };
        let hash = hash_of(b"fresh");
        coordinator.content.store_bytes(b"fresh", None).await.unwrap();
        let file = FileArtifact::output(AbsolutePath::new(root.join("fresh.txt")), 1);
        coordinator
            .file_hashes
            .report_content(
                file.clone(),
                FileMaterializationInfo::new(hash).with_length(5),
                Origin::NotMaterialized,
            )
            .unwrap();
        coordinator.seals.register_dynamic(dir.clone(), vec![file.clone()]);

        let report = coordinator
            .materialize_dependencies(MaterializeRequest {
                inputs: vec![MaterializationInput::File(file.clone())],
                dynamic_directories: vec![DynamicDirectoryRequest {
                    directory: dir.clone(),
                    preserve_existing_outputs: false,
                }],
                hydrate_reads: vec![],
                policy: MaterializePolicy::default(),
            })
            .await;

        assert!(report.failed_directories.is_empty());
        assert!(!root.join("stale.txt").exists());
        assert_eq!(fs::read_to_string(root.join("fresh.txt")).unwrap(), "fresh");
        assert!(coordinator.is_directory_materialized(&dir));
    }

    #[tokio::test]
    async fn content_recovery_restores_from_a_sibling_with_the_same_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let coordinator = coordinator(tmp.path());

        let sibling_path = tmp.path().join("sibling.txt");
        fs::write(&sibling_path, b"shared bytes").unwrap();
        let hash = hash_of(b"shared bytes");
        let sibling = FileArtifact::source(AbsolutePath::new(&sibling_path));
        coordinator
            .file_hashes
            .report_content(
                sibling,
                FileMaterializationInfo::new(hash).with_length(12),
                Origin::NotMaterialized,
            )
            .unwrap();

        let target = tmp.path().join("out.txt");
        let file = FileArtifact::output(AbsolutePath::new(&target), 1);
        coordinator
            .file_hashes
            .report_content(
                file.clone(),
                FileMaterializationInfo::new(hash).with_length(12),
                Origin::NotMaterialized,
            )
            .unwrap();

        let report = coordinator
            .materialize_dependencies(MaterializeRequest {
                inputs: vec![MaterializationInput::File(file.clone())],
                dynamic_directories: vec![],
                hydrate_reads: vec![],
                policy: MaterializePolicy::default(),
            })
            .await;

        assert_eq!(report.origins.get(&file), Some(&Ok(Origin::DeployedFromCache)));
        assert_eq!(fs::read_to_string(&target).unwrap(), "shared bytes");
    }

    #[tokio::test]
    async fn unavailable_content_with_no_copy_source_fails_materialization() {
        let tmp = tempfile::tempdir().unwrap();
        let coordinator = coordinator(tmp.path());

        let target = tmp.path().join("out.txt");
        let file = FileArtifact::output(AbsolutePath::new(&target), 1);
        let hash = hash_of(b"never stored anywhere");
        coordinator
            .file_hashes
            .report_content(
                file.clone(),
                FileMaterializationInfo::new(hash).with_length(21),
                Origin::NotMaterialized,
            )
            .unwrap();

        let report = coordinator
            .materialize_dependencies(MaterializeRequest {
                inputs: vec![MaterializationInput::File(file.clone())],
                dynamic_directories: vec![],
                hydrate_reads: vec![],
                policy: MaterializePolicy::default(),
            })
            .await;

        assert!(matches!(
            report.origins.get(&file),
            Some(Err(MaterializeError::Unavailable(_)))
        ));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn i2_orders_a_rewrite_after_its_prior_version() {
        let tmp = tempfile::tempdir().unwrap();
        let coordinator = coordinator(tmp.path());
        let target = tmp.path().join("out.txt");

        let hash_v1 = coordinator.content.store_bytes(b"v1", None).await.unwrap();
        let hash_v2 = coordinator.content.store_bytes(b"v2", None).await.unwrap();

        let v1 = FileArtifact::output(AbsolutePath::new(&target), 1);
        let v2 = FileArtifact::output(AbsolutePath::new(&target), 2);
        coordinator
            .file_hashes
            .report_content(v1.clone(), FileMaterializationInfo::new(hash_v1).with_length(2), Origin::NotMaterialized)
            .unwrap();
        coordinator
            .file_hashes
            .report_content(v2.clone(), FileMaterializationInfo::new(hash_v2).with_length(2), Origin::NotMaterialized)
            .unwrap();

        let report = coordinator
            .materialize_dependencies(MaterializeRequest {
                inputs: vec![MaterializationInput::File(v1.clone()), MaterializationInput::File(v2.clone())],
                dynamic_directories: vec![],
                hydrate_reads: vec![],
                policy: MaterializePolicy::default(),
            })
            .await;

        assert_eq!(report.origins.get(&v1), Some(&Ok(Origin::DeployedFromCache)));
        assert_eq!(report.origins.get(&v2), Some(&Ok(Origin::DeployedFromCache)));
        assert_eq!(fs::read_to_string(&target).unwrap(), "v2");
    }

    #[tokio::test]
    async fn i2_holds_even_when_the_batch_lists_the_rewrite_before_its_prior() {
        let tmp = tempfile::tempdir().unwrap();
        let coordinator = coordinator(tmp.path());
        let target = tmp.path().join("out.txt");

        let hash_v1 = coordinator.content.store_bytes(b"v1", None).await.unwrap();
        let hash_v2 = coordinator.content.store_bytes(b"v2", None).await.unwrap();

        let v1 = FileArtifact::output(AbsolutePath::new(&target), 1);
        let v2 = FileArtifact::output(AbsolutePath::new(&target), 2);
        coordinator
            .file_hashes
            .report_content(v1.clone(), FileMaterializationInfo::new(hash_v1).with_length(2), Origin::NotMaterialized)
            .unwrap();
        coordinator
            .file_hashes
            .report_content(v2.clone(), FileMaterializationInfo::new(hash_v2).with_length(2), Origin::NotMaterialized)
            .unwrap();

        // Declared in reverse order: v2 before v1. I2 must still hold.
        let report = coordinator
            .materialize_dependencies(MaterializeRequest {
                inputs: vec![MaterializationInput::File(v2.clone()), MaterializationInput::File(v1.clone())],
                dynamic_directories: vec![],
                hydrate_reads: vec![],
                policy: MaterializePolicy::default(),
            })
            .await;

        assert_eq!(report.origins.get(&v1), Some(&Ok(Origin::DeployedFromCache)));
        assert_eq!(report.origins.get(&v2), Some(&Ok(Origin::DeployedFromCache)));
        assert_eq!(fs::read_to_string(&target).unwrap(), "v2");
    }

    #[tokio::test]
    async fn cancellation_resolves_pending_placements_without_panicking() {
        let tmp = tempfile::tempdir().unwrap();
        let coordinator = coordinator(tmp.path());
        coordinator.cancellation.cancel();

        let target = tmp.path().join("out.txt");
        let hash = coordinator.content.store_bytes(b"irrelevant", None).await.unwrap();
        let file = FileArtifact::output(AbsolutePath::new(&target), 1);
        coordinator
            .file_hashes
            .report_content(file.clone(), FileMaterializationInfo::new(hash).with_length(10), Origin::NotMaterialized)
            .unwrap();

        let report = coordinator
            .materialize_dependencies(MaterializeRequest {
                inputs: vec![MaterializationInput::File(file.clone())],
                dynamic_directories: vec![],
                hydrate_reads: vec![],
                policy: MaterializePolicy::default(),
            })
            .await;

        assert!(matches!(report.origins.get(&file), Some(Err(MaterializeError::Cancelled))));
    }
}
