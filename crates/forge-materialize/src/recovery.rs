//! Content recovery: what happens when [`ContentStore::load_available`]
//! reports a hash the engine needs is not present anywhere reachable.

use std::path::Path;

use forge_content::{ContentStore, ContentStoreExt};
use forge_filehash::FileHashRegistry;
use forge_types::{ContentHash, FileArtifact, Origin};
use fs_err as fs;

use crate::error::MaterializeError;

/// Outcome of attempting to recover one unavailable hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The hash is now available in the content store.
    Recovered(Origin),
    /// No copy-source could be found; materialization of files needing
    /// this hash must fail.
    Unavailable,
}

/// Policy inputs that change how "the target already has the right
/// bytes" is treated.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    pub preserve_outputs: bool,
    pub outputs_not_stored_to_cache: bool,
}

impl RecoveryPolicy {
    fn on_disk_content_is_already_sufficient(&self) -> bool {
        self.preserve_outputs || self.outputs_not_stored_to_cache
    }
}

/// Attempt to recover `hash` for `target_path`, per §4.7.3:
///
/// 1. If `target_path` already holds the right bytes, either accept it in
///    place or restore it into the content store.
/// 2. Else look for another tracked [`FileArtifact`] with the same
///    content — materialized or a source file — and restore its bytes.
/// 3. Else report unavailable.
///
/// Step 2's "enqueue as a dependent materialization" branch (recovering
/// from an artifact that is itself only planned, not yet on disk) is the
/// caller's responsibility: this function only ever reads bytes that are
/// already on disk, and returns [`RecoveryOutcome::Unavailable`] when the
/// only candidates are artifacts the caller must materialize first and
/// retry.
pub async fn recover_content(
    store: &dyn ContentStore,
    file_hashes: &FileHashRegistry,
    hash: ContentHash,
    target_path: &Path,
    policy: RecoveryPolicy,
) -> Result<RecoveryOutcome, MaterializeError> {
    if let Some(origin) = try_recover_from_target_path(store, hash, target_path, policy).await? {
        return Ok(RecoveryOutcome::Recovered(origin));
    }

    for candidate in file_hashes.artifacts_with_content(hash) {
        if let Some(origin) = try_recover_from_artifact(store, file_hashes, &candidate).await? {
            return Ok(RecoveryOutcome::Recovered(origin));
        }
    }

    Ok(RecoveryOutcome::Unavailable)
}

async fn try_recover_from_target_path(
    store: &dyn ContentStore,
    hash: ContentHash,
    target_path: &Path,
    policy: RecoveryPolicy,
) -> Result<Option<Origin>, MaterializeError> {
    let Ok(bytes) = fs::read(target_path) else {
        return Ok(None);
    };
    if ContentHash::from_bytes(&bytes) != hash {
        return Ok(None);
    }

    if policy.on_disk_content_is_already_sufficient() {
        return Ok(Some(Origin::UpToDate));
    }

    store.store_bytes(&bytes, Some(hash)).await?;
    Ok(Some(Origin::UpToDate))
}

/// Restore `candidate`'s bytes into the store under `hash`, if `candidate`
/// is known to already hold them on disk (materialized output or source
/// file). Returns `Ok(None)` when `candidate` is neither, so the caller
/// can move on to the next candidate or fall back to the dependent-
/// materialization path.
async fn try_recover_from_artifact(
    store: &dyn ContentStore,
    file_hashes: &FileHashRegistry,
    candidate: &FileArtifact,
) -> Result<Option<Origin>, MaterializeError> {
    if !file_hashes.is_materialized(candidate) && !candidate.is_source() {
        return Ok(None);
    }

    let info = match file_hashes.get_input_content(candidate) {
        Ok(info) => info,
        Err(_) => return Ok(None),
    };

    let Ok(bytes) = fs::read(candidate.path.as_path()) else {
        return Ok(None);
    };

    store.store_bytes(&bytes, Some(info.content_hash)).await?;
    Ok(Some(Origin::UpToDate))
}
