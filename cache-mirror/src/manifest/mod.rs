//! Checksum manifests for incremental synchronization.
//!
//! A manifest records, for every in-scope `(index, archive, file)` of a cache,
//! the CRC32 and size of its content. Diffing two manifests tells the pipeline
//! which entries need extracting again without re-reading the whole cache.

pub mod diff;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::checksum::checksum;
use crate::game::{Environment, GameType};

pub use diff::{diff, FileDifferences};

/// Identity metadata stamped on every manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestInfo {
    pub revision: u32,
    pub game_type: GameType,
    pub environment: Environment,
}

/// Snapshot of checksums across the index/archive/file tree.
///
/// Immutable once built; replace it wholesale instead of editing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumManifest {
    revision: u32,
    game_type: GameType,
    environment: Environment,
    timestamp: DateTime<Utc>,
    indices: BTreeMap<u32, IndexChecksums>,
}

/// Checksums of one index (a content category such as sprites or configs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexChecksums {
    pub index: u32,
    pub archives: BTreeMap<u32, ArchiveChecksums>,
}

/// Checksums of one archive. Never recorded without at least one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveChecksums {
    pub index: u32,
    pub archive: u32,
    pub files: BTreeMap<u32, FileChecksum>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileChecksum {
    pub index: u32,
    pub archive: u32,
    pub file: u32,
    /// CRC32, zero-extended
    pub crc32: u64,
    /// Size in bytes (informational, not part of content equality)
    pub size: u64,
}

impl FileChecksum {
    /// Checksum `data` as the content of `index/archive/file`.
    pub fn of(index: u32, archive: u32, file: u32, data: &[u8]) -> Self {
        Self {
            index,
            archive,
            file,
            crc32: checksum(data),
            size: data.len() as u64,
        }
    }

    pub fn key(&self) -> (u32, u32, u32) {
        (self.index, self.archive, self.file)
    }

    /// Same coordinates and same CRC32.
    pub fn same_content(&self, other: &FileChecksum) -> bool {
        self.key() == other.key() && self.crc32 == other.crc32
    }
}

impl IndexChecksums {
    pub fn files(&self) -> impl Iterator<Item = &FileChecksum> {
        self.archives.values().flat_map(|archive| archive.files.values())
    }

    pub fn file_count(&self) -> usize {
        self.archives.values().map(|archive| archive.files.len()).sum()
    }
}

impl ArchiveChecksums {
    pub fn files(&self) -> impl Iterator<Item = &FileChecksum> {
        self.files.values()
    }
}

impl ChecksumManifest {
    /// A manifest with no entries, used as the baseline on a first run.
    pub fn empty(info: ManifestInfo) -> Self {
        ManifestBuilder::new(info).build()
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn game_type(&self) -> GameType {
        self.game_type
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn info(&self) -> ManifestInfo {
        ManifestInfo {
            revision: self.revision,
            game_type: self.game_type,
            environment: self.environment,
        }
    }

    pub fn indices(&self) -> &BTreeMap<u32, IndexChecksums> {
        &self.indices
    }

    pub fn index(&self, index: u32) -> Option<&IndexChecksums> {
        self.indices.get(&index)
    }

    pub fn get(&self, index: u32, archive: u32, file: u32) -> Option<&FileChecksum> {
        self.indices
            .get(&index)?
            .archives
            .get(&archive)?
            .files
            .get(&file)
    }

    /// Every file checksum, ordered by index, archive, file.
    pub fn files(&self) -> impl Iterator<Item = &FileChecksum> {
        self.indices.values().flat_map(|index| index.files())
    }

    pub fn file_count(&self) -> usize {
        self.indices.values().map(|index| index.file_count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Same entries and metadata, ignoring when each manifest was taken.
    pub fn same_content(&self, other: &ChecksumManifest) -> bool {
        self.info() == other.info() && self.indices == other.indices
    }
}

/// Accumulates file checksums into a [`ChecksumManifest`].
pub struct ManifestBuilder {
    info: ManifestInfo,
    timestamp: Option<DateTime<Utc>>,
    indices: BTreeMap<u32, IndexChecksums>,
}

impl ManifestBuilder {
    pub fn new(info: ManifestInfo) -> Self {
        Self {
            info,
            timestamp: None,
            indices: BTreeMap::new(),
        }
    }

    /// Pin the creation instant (defaults to now at `build`).
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Record one file. A later checksum for the same key replaces the earlier one.
    pub fn add(&mut self, checksum: FileChecksum) {
        let index = self
            .indices
            .entry(checksum.index)
            .or_insert_with(|| IndexChecksums {
                index: checksum.index,
                archives: BTreeMap::new(),
            });
        let archive = index
            .archives
            .entry(checksum.archive)
            .or_insert_with(|| ArchiveChecksums {
                index: checksum.index,
                archive: checksum.archive,
                files: BTreeMap::new(),
            });
        archive.files.insert(checksum.file, checksum);
    }

    pub fn with(mut self, checksum: FileChecksum) -> Self {
        self.add(checksum);
        self
    }

    pub fn build(self) -> ChecksumManifest {
        ChecksumManifest {
            revision: self.info.revision,
            game_type: self.info.game_type,
            environment: self.info.environment,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            indices: self.indices,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn info() -> ManifestInfo {
        ManifestInfo {
            revision: 221,
            game_type: GameType::OldSchool,
            environment: Environment::Live,
        }
    }

    pub fn entry(index: u32, archive: u32, file: u32, crc32: u64) -> FileChecksum {
        FileChecksum {
            index,
            archive,
            file,
            crc32,
            size: 16,
        }
    }

    pub fn manifest(entries: &[FileChecksum]) -> ChecksumManifest {
        let mut builder = ManifestBuilder::new(info());
        for entry in entries {
            builder.add(*entry);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_builder_groups_by_index_and_archive() {
        let manifest = manifest(&[
            entry(2, 10, 1, 11),
            entry(2, 10, 2, 12),
            entry(2, 6, 1, 13),
            entry(8, 0, 0, 14),
        ]);

        assert_eq!(manifest.indices().len(), 2);
        assert_eq!(manifest.index(2).unwrap().archives.len(), 2);
        assert_eq!(manifest.file_count(), 4);
        assert_eq!(manifest.get(2, 10, 2).map(|f| f.crc32), Some(12));
        assert!(manifest.get(2, 10, 3).is_none());
    }

    #[test]
    fn test_files_are_ordered() {
        let manifest = manifest(&[entry(8, 0, 0, 1), entry(2, 10, 2, 2), entry(2, 10, 1, 3)]);
        let keys: Vec<_> = manifest.files().map(|f| f.key()).collect();
        assert_eq!(keys, vec![(2, 10, 1), (2, 10, 2), (8, 0, 0)]);
    }

    #[test]
    fn test_file_checksum_of() {
        let checksum = FileChecksum::of(9, 0, 3, b"123456789");
        assert_eq!(checksum.crc32, 0xCBF4_3926);
        assert_eq!(checksum.size, 9);

        let resized = FileChecksum { size: 1, ..checksum };
        assert!(checksum.same_content(&resized));
    }

    #[test]
    fn test_same_content_ignores_timestamp() {
        let a = ManifestBuilder::new(info())
            .with(entry(2, 10, 1, 1))
            .timestamp(DateTime::<Utc>::from_timestamp(0, 0).unwrap())
            .build();
        let b = ManifestBuilder::new(info()).with(entry(2, 10, 1, 1)).build();

        assert_ne!(a, b);
        assert!(a.same_content(&b));
    }

    #[test]
    fn test_empty_manifest() {
        let manifest = ChecksumManifest::empty(info());
        assert!(manifest.is_empty());
        assert_eq!(manifest.file_count(), 0);
        assert_eq!(manifest.revision(), 221);
    }
}
