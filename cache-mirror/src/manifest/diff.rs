//! Manifest diffing.
//!
//! Content changes and fresh additions both land in `added`: downstream they
//! mean the same thing (extract the entry again).

use std::collections::BTreeSet;

use super::{ArchiveChecksums, ChecksumManifest, FileChecksum, IndexChecksums};

/// Changeset between two manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDifferences {
    /// New or content-changed files, with their checksums from the new manifest
    pub added: Vec<FileChecksum>,
    /// Files no longer present, with their checksums from the old manifest
    pub removed: Vec<FileChecksum>,
}

impl FileDifferences {
    /// Every file in `manifest` as added, the changeset of a first run.
    pub fn all_added(manifest: &ChecksumManifest) -> Self {
        Self {
            added: manifest.files().copied().collect(),
            removed: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    /// Indices with at least one added or removed entry.
    pub fn touched_indices(&self) -> BTreeSet<u32> {
        self.added
            .iter()
            .chain(self.removed.iter())
            .map(|f| f.index)
            .collect()
    }
}

/// Compare `old` against `new`.
pub fn diff(old: &ChecksumManifest, new: &ChecksumManifest) -> FileDifferences {
    let mut differences = FileDifferences::default();

    for (index_id, new_index) in new.indices() {
        match old.index(*index_id) {
            None => differences.added.extend(new_index.files().copied()),
            Some(old_index) => diff_index(old_index, new_index, &mut differences),
        }
    }

    for (index_id, old_index) in old.indices() {
        if new.index(*index_id).is_none() {
            differences.removed.extend(old_index.files().copied());
        }
    }

    differences
}

fn diff_index(old: &IndexChecksums, new: &IndexChecksums, differences: &mut FileDifferences) {
    for (archive_id, new_archive) in &new.archives {
        match old.archives.get(archive_id) {
            None => differences.added.extend(new_archive.files().copied()),
            Some(old_archive) => diff_archive(old_archive, new_archive, differences),
        }
    }

    for (archive_id, old_archive) in &old.archives {
        if !new.archives.contains_key(archive_id) {
            differences.removed.extend(old_archive.files().copied());
        }
    }
}

fn diff_archive(old: &ArchiveChecksums, new: &ArchiveChecksums, differences: &mut FileDifferences) {
    for (file_id, new_file) in &new.files {
        match old.files.get(file_id) {
            Some(old_file) if old_file.crc32 == new_file.crc32 => {}
            _ => differences.added.push(*new_file),
        }
    }

    for (file_id, old_file) in &old.files {
        if !new.files.contains_key(file_id) {
            differences.removed.push(*old_file);
        }
    }
}
