//! Sprite extraction.
//!
//! A sprite archive holds a single file (file 0) carrying one sprite group,
//! so the archive id is the sprite id and removing that file removes the
//! sprite. Besides its dual data the extractor writes every group to
//! `sprites/files/{id}.dat`. Writes are buffered and issued concurrently in
//! fixed-size batches, each batch finished before the next starts, to cap
//! the number of open file handles. An entry's dual data is recorded only
//! once its own file is on disk.

use rayon::prelude::*;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{Extractor, ExtractorBase, NameTable};
use crate::checksum::checksum;
use crate::game::{gameval_table, index};
use crate::manifest::FileChecksum;
use crate::utils::{Result, SyncError};

pub const CATEGORY: &str = "sprites";

/// One decoded sprite group waiting for its file write.
struct PendingSprite {
    archive: u32,
    file: u32,
    path: PathBuf,
    data: Vec<u8>,
    web: Value,
    cache: Value,
}

pub struct SpriteExtractor {
    base: ExtractorBase,
    files_dir: PathBuf,
    names: NameTable,
    batch_size: usize,
    pending: Vec<PendingSprite>,
}

impl SpriteExtractor {
    /// Runs on the caller's thread; batches fan out over the rayon pool.
    pub fn new(extracted_root: &Path, names: NameTable, batch_size: usize) -> Self {
        Self {
            base: ExtractorBase::with_dual_data(CATEGORY, extracted_root, CATEGORY),
            files_dir: extracted_root.join(CATEGORY).join("files"),
            names,
            batch_size: batch_size.max(1),
            pending: Vec::new(),
        }
    }

    fn file_path(&self, id: u32) -> PathBuf {
        self.files_dir.join(format!("{}.dat", id))
    }

    /// Number of sprite files buffered but not yet written.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Write all buffered sprite files, one batch at a time, and record the
    /// entries whose write succeeded. Failed entries are logged and returned
    /// with their own coordinates.
    fn flush_pending(&mut self) -> Vec<(u32, u32, SyncError)> {
        if self.pending.is_empty() {
            return Vec::new();
        }

        let pending = std::mem::take(&mut self.pending);
        let total = pending.len();
        let mut failed = Vec::new();

        if let Err(e) = std::fs::create_dir_all(&self.files_dir) {
            warn!("Failed to create {}: {}", self.files_dir.display(), e);
            for sprite in pending {
                let error = SyncError::extraction(index::SPRITES, sprite.archive, sprite.file, &e);
                failed.push((sprite.archive, sprite.file, error));
            }
            return failed;
        }

        let mut pending = pending.into_iter();
        loop {
            let batch: Vec<PendingSprite> = pending.by_ref().take(self.batch_size).collect();
            if batch.is_empty() {
                break;
            }
            let results: Vec<std::io::Result<()>> = batch
                .par_iter()
                .map(|sprite| std::fs::write(&sprite.path, &sprite.data))
                .collect();

            for (sprite, result) in batch.into_iter().zip(results) {
                match result {
                    Ok(()) => self.base.record(sprite.archive, sprite.web, sprite.cache),
                    Err(e) => {
                        warn!("Failed to write sprite {}: {}", sprite.path.display(), e);
                        let error = SyncError::extraction(index::SPRITES, sprite.archive, sprite.file, e);
                        failed.push((sprite.archive, sprite.file, error));
                    }
                }
            }
        }

        debug!(
            "Wrote {} of {} sprite files in batches of {}",
            total - failed.len(),
            total,
            self.batch_size
        );
        failed
    }
}

impl Extractor for SpriteExtractor {
    fn base(&self) -> &ExtractorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ExtractorBase {
        &mut self.base
    }

    fn entry_id(&self, archive: u32, _file: u32) -> u32 {
        archive
    }

    fn extract(&mut self, index: u32, archive: u32, file: u32, data: &[u8]) -> Result<()> {
        // Sprite groups end with a footer carrying at least the frame count
        if data.len() < 2 {
            return Err(SyncError::extraction(index, archive, file, "sprite group too short"));
        }
        let frames = u16::from_be_bytes([data[data.len() - 2], data[data.len() - 1]]);

        let id = self.entry_id(archive, file);
        let name = self.names.get(gameval_table::SPRITES, id);

        self.pending.push(PendingSprite {
            archive,
            file,
            path: self.file_path(id),
            data: data.to_vec(),
            web: json!({
                "id": id,
                "name": name,
                "frames": frames,
            }),
            cache: json!({
                "id": id,
                "name": name,
                "frames": frames,
                "size": data.len(),
                "crc32": checksum(data),
                "file": format!("files/{}.dat", id),
            }),
        });
        if self.pending.len() < self.batch_size {
            return Ok(());
        }

        // The current entry's own failure is its result; failures of earlier
        // entries in the batch are counted separately.
        let mut failed = self.flush_pending();
        let own = failed
            .iter()
            .position(|(a, f, _)| *a == archive && *f == file)
            .map(|position| failed.swap_remove(position).2);
        self.base.note_failures(failed.len());
        match own {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn remove(&mut self, entry: &FileChecksum) -> Result<()> {
        let id = self.entry_id(entry.archive, entry.file);
        let path = self.file_path(id);
        self.pending.retain(|pending| pending.path != path);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        self.base.forget(id);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        let failed = self.flush_pending();
        self.base.note_failures(failed.len());
        self.base.end()
    }

    fn clear_extraction_data(&mut self) -> Result<()> {
        self.pending = Vec::new();
        self.base.clear();
        Ok(())
    }
}
