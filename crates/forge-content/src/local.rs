use std::path::{Path, PathBuf};

use fs_err as fs;
use forge_fs::RealizationMode;
use forge_types::{ContentHash, Origin, StreamingHasher};
use tokio::io::AsyncReadExt;

use crate::error::ContentError;
use crate::trait_def::{
    AvailabilityReport, AvailabilitySource, ContentStore, HashAvailability, MaterializeOutcome,
    TrackedFileContentInfo,
};

/// A content-addressed filesystem store: `<root>/<hash[0..2]>/<hash>`,
/// written via temp-file-then-atomic-rename: stage in a sibling temp
/// path, then rename into place so readers never see a partially
/// written blob.
///
/// Stands in for the pluggable, potentially-networked blob store a real
/// deployment would use: every hash is "local or nothing" here, so
/// `load_available` never actually transfers bytes — it simply reports
/// what's on disk.
#[derive(Debug, Clone)]
pub struct LocalContentStore {
    root: PathBuf,
}

impl LocalContentStore {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.hex();
        self.root.join(&hex[0..2]).join(hex)
    }

    async fn write_atomically(&self, hash: &ContentHash, bytes: &[u8]) -> Result<(), ContentError> {
        let dest = self.blob_path(hash);
        if dest.exists() {
            return Ok(());
        }
        let dir = dest.parent().expect("blob path always has a parent");
        fs::create_dir_all(dir).map_err(|e| ContentError::io(dir.display().to_string(), e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| ContentError::io(dir.display().to_string(), e))?;
        std::io::Write::write_all(&mut tmp, bytes)
            .map_err(|e| ContentError::io(dest.display().to_string(), e))?;
        tmp.persist(&dest)
            .map_err(|e| ContentError::io(dest.display().to_string(), e.error))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ContentStore for LocalContentStore {
    async fn load_available(&self, hashes: &[ContentHash]) -> Result<AvailabilityReport, ContentError> {
        let mut per_hash = std::collections::HashMap::with_capacity(hashes.len());
        let mut all_available = true;
        for hash in hashes {
            let available = self.blob_path(hash).is_file();
            all_available &= available;
            per_hash.insert(
                *hash,
                HashAvailability {
                    available,
                    source: if available {
                        AvailabilitySource::Local
                    } else {
                        AvailabilitySource::Unavailable
                    },
                    bytes_transferred: 0,
                },
            );
        }
        Ok(AvailabilityReport {
            per_hash,
            all_available,
        })
    }

    async fn store_path(&self, path: &Path, hash: Option<ContentHash>) -> Result<ContentHash, ContentError> {
        let bytes = fs::read(path).map_err(|e| ContentError::io(path.display().to_string(), e))?;
        self.store_bytes(&bytes, hash).await
    }

    async fn store_bytes(&self, bytes: &[u8], hash: Option<ContentHash>) -> Result<ContentHash, ContentError> {
        let computed = {
            let mut hasher = StreamingHasher::new();
            hasher.update(bytes);
            ContentHash::from_raw(hasher.finalize())
        };
        if let Some(expected) = hash {
            if expected != computed {
                return Err(ContentError::Corrupted {
                    hash: expected,
                    attempts: 1,
                });
            }
        }
        self.write_atomically(&computed, bytes).await?;
        Ok(computed)
    }

    async fn read_bytes(&self, hash: &ContentHash) -> Result<Vec<u8>, ContentError> {
        let path = self.blob_path(hash);
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|_| ContentError::Unavailable(*hash))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .await
            .map_err(|e| ContentError::io(path.display().to_string(), e))?;
        Ok(buf)
    }

    async fn materialize(
        &self,
        hash: &ContentHash,
        realization_mode: RealizationMode,
        target_path: &Path,
        _allow_virtualization: bool,
        track: bool,
    ) -> Result<MaterializeOutcome, ContentError> {
        let source = self.blob_path(hash);
        if !source.is_file() {
            return Err(ContentError::Unavailable(*hash));
        }

        if target_path.is_file() {
            let existing_matches = {
                let mut hasher = StreamingHasher::new();
                let bytes = fs::read(target_path)
                    .map_err(|e| ContentError::io(target_path.display().to_string(), e))?;
                hasher.update(&bytes);
                ContentHash::from_raw(hasher.finalize()) == *hash
            };
            if existing_matches {
                let tracked = track.then(|| {
                    let length = fs::metadata(target_path).map(|m| m.len()).unwrap_or(0);
                    TrackedFileContentInfo {
                        hash: *hash,
                        length,
                    }
                });
                return Ok(MaterializeOutcome {
                    origin: Origin::UpToDate,
                    tracked,
                });
            }
        }

        forge_fs::hardlink_or_copy(&source, target_path, realization_mode)
            .map_err(|e| ContentError::io(target_path.display().to_string(), e))?;

        let tracked = track.then(|| {
            let length = fs::metadata(target_path).map(|m| m.len()).unwrap_or(0);
            TrackedFileContentInfo {
                hash: *hash,
                length,
            }
        });

        Ok(MaterializeOutcome {
            origin: Origin::DeployedFromCache,
            tracked,
        })
    }
}
