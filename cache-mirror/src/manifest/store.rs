//! Building manifests from a live cache and persisting them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, warn};

use super::{ChecksumManifest, FileChecksum, ManifestBuilder, ManifestInfo};
use crate::store::Cache;
use crate::utils::{Result, SyncError};

/// Which parts of a cache are checksummed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestScope {
    indices: BTreeSet<u32>,
    excluded: BTreeSet<u32>,
    archive_filters: BTreeMap<u32, BTreeSet<u32>>,
}

impl ManifestScope {
    pub fn new(
        indices: impl IntoIterator<Item = u32>,
        excluded: impl IntoIterator<Item = u32>,
        archive_filters: BTreeMap<u32, Vec<u32>>,
    ) -> Self {
        Self {
            indices: indices.into_iter().collect(),
            excluded: excluded.into_iter().collect(),
            archive_filters: archive_filters
                .into_iter()
                .map(|(index, archives)| (index, archives.into_iter().collect()))
                .collect(),
        }
    }

    pub fn includes_index(&self, index: u32) -> bool {
        self.indices.contains(&index) && !self.excluded.contains(&index)
    }

    /// Archives are in scope unless their index carries an allow-list without them.
    pub fn includes_archive(&self, index: u32, archive: u32) -> bool {
        self.archive_filters
            .get(&index)
            .map_or(true, |allowed| allowed.contains(&archive))
    }
}

/// Walk `cache` and checksum every in-scope file.
///
/// Files whose content cannot be read are left out; they show up as added on
/// the first pass that can read them. Empty archives are never recorded.
pub fn build_manifest(cache: &dyn Cache, scope: &ManifestScope, info: ManifestInfo) -> ChecksumManifest {
    let mut builder = ManifestBuilder::new(info);
    let mut unreadable = 0usize;

    for index in cache.indices() {
        if !scope.includes_index(index) {
            continue;
        }

        for archive in cache.archives(index) {
            if !scope.includes_archive(index, archive) {
                continue;
            }
            if cache.file_count(index, archive) == 0 {
                continue;
            }

            for file in cache.files(index, archive) {
                match cache.data(index, archive, Some(file)) {
                    Some(data) => builder.add(FileChecksum::of(index, archive, file, &data)),
                    None => {
                        debug!("Unreadable entry {}/{}/{}, leaving it out", index, archive, file);
                        unreadable += 1;
                    }
                }
            }
        }
    }

    let manifest = builder.build();
    info!(
        "Built manifest for revision {}: {} indices, {} files ({} unreadable)",
        info.revision,
        manifest.indices().len(),
        manifest.file_count(),
        unreadable
    );
    manifest
}

/// Load a persisted manifest. Missing or malformed files yield `None`.
pub async fn load_manifest(path: &Path) -> Option<ChecksumManifest> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No manifest at {}", path.display());
            return None;
        }
        Err(e) => {
            warn!("Failed to read manifest {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_slice::<ChecksumManifest>(&bytes) {
        Ok(manifest) => {
            info!(
                "Loaded manifest: revision {}, {} files",
                manifest.revision(),
                manifest.file_count()
            );
            Some(manifest)
        }
        Err(e) => {
            warn!("Failed to parse manifest {}: {}", path.display(), e);
            None
        }
    }
}

/// Persist `manifest` as compact JSON, replacing any previous file.
///
/// The file is written next to its destination and renamed into place so a
/// crash never leaves a truncated manifest behind.
pub async fn save_manifest(manifest: &ChecksumManifest, path: &Path) -> Result<()> {
    let json = serde_json::to_vec(manifest)?;
    let persist_err = |source| SyncError::ManifestPersist {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(persist_err)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await.map_err(persist_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(persist_err)?;

    debug!("Saved manifest ({} bytes) to {}", json.len(), path.display());
    Ok(())
}
