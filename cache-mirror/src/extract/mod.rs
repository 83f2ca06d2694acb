//! Extractor framework.
//!
//! An extractor turns raw cache entries of one index into derived artifacts.
//! Most keep their output as [`DualData`]: per-id `web` and `cache` values
//! that are loaded when the extractor is built and flushed back at
//! [`Extractor::end`].

pub mod configs;
pub mod dual_data;
pub mod names;
pub mod parent;
pub mod registry;
pub mod sprites;
pub mod textures;

use std::path::Path;
use std::sync::Arc;

use crate::manifest::FileChecksum;
use crate::progress::{Progress, ProgressBar};
use crate::utils::Result;

pub use dual_data::DualData;
pub use names::NameTable;
pub use parent::ParentExtractor;
pub use registry::{build_extractors, sort_changeset, ExtractorContext, IndexType, PROCESSING_ORDER};

/// State shared by every extractor implementation.
#[derive(Debug)]
pub struct ExtractorBase {
    name: String,
    dual: Option<DualData>,
    bar: Option<ProgressBar>,
    flush: Option<Arc<ProgressBar>>,
    failures: usize,
}

impl ExtractorBase {
    /// An extractor without persisted output.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dual: None,
            bar: None,
            flush: None,
            failures: 0,
        }
    }

    /// An extractor persisting dual data under `extracted_root/category`.
    pub fn with_dual_data(name: impl Into<String>, extracted_root: &Path, category: &str) -> Self {
        Self {
            dual: Some(DualData::load(extracted_root, category)),
            ..Self::new(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dual_data(&self) -> Option<&DualData> {
        self.dual.as_ref()
    }

    pub fn dual_data_mut(&mut self) -> Option<&mut DualData> {
        self.dual.as_mut()
    }

    /// Store one entry's derived values (no-op without dual data).
    pub fn record(&mut self, id: u32, web: serde_json::Value, cache: serde_json::Value) {
        if let Some(dual) = self.dual.as_mut() {
            dual.insert(id, web, cache);
        }
    }

    pub fn forget(&mut self, id: u32) {
        if let Some(dual) = self.dual.as_mut() {
            dual.remove(id);
        }
    }

    /// Count entries that failed after their `extract` call returned.
    pub fn note_failures(&mut self, count: usize) {
        self.failures += count;
    }

    pub fn take_failures(&mut self) -> usize {
        std::mem::take(&mut self.failures)
    }

    pub fn attach_bar(&mut self, bar: ProgressBar) {
        self.bar = Some(bar);
    }

    pub fn set_flush(&mut self, flush: Arc<ProgressBar>) {
        self.flush = Some(flush);
    }

    pub fn step(&self) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    pub fn pending_writes(&self) -> u64 {
        self.dual.as_ref().map_or(0, DualData::pending_writes)
    }

    /// Flush dual data and release the progress bar.
    pub fn end(&mut self) -> Result<()> {
        self.bar.take();
        let result = match &self.dual {
            Some(dual) => dual.flush(self.flush.as_deref()),
            None => Ok(()),
        };
        self.flush.take();
        result
    }

    pub fn clear(&mut self) {
        if let Some(dual) = self.dual.as_mut() {
            dual.clear();
        }
    }
}

/// Per-entry processor for one cache index.
///
/// The dispatcher calls [`prepare`](Extractor::prepare) once with every
/// changeset entry headed here, then [`extract`](Extractor::extract) or
/// [`remove`](Extractor::remove) per entry followed by
/// [`advance`](Extractor::advance), and finally [`end`](Extractor::end) and
/// [`clear_extraction_data`](Extractor::clear_extraction_data).
pub trait Extractor: Send {
    fn base(&self) -> &ExtractorBase;

    fn base_mut(&mut self) -> &mut ExtractorBase;

    fn name(&self) -> &str {
        self.base().name()
    }

    /// Process one added or changed entry.
    fn extract(&mut self, index: u32, archive: u32, file: u32, data: &[u8]) -> Result<()>;

    /// Id under which an entry is kept in dual data.
    fn entry_id(&self, _archive: u32, file: u32) -> u32 {
        file
    }

    /// Drop a removed entry from the derived output.
    fn remove(&mut self, entry: &FileChecksum) -> Result<()> {
        let id = self.entry_id(entry.archive, entry.file);
        self.base_mut().forget(id);
        Ok(())
    }

    /// Create progress bars sized by the entries this extractor will see.
    fn prepare(&mut self, entries: &[FileChecksum], progress: &Progress) {
        let bar = progress.bar(self.name().to_string(), entries.len() as u64);
        self.base_mut().attach_bar(bar);
    }

    /// Count one processed entry against the right bar.
    fn advance(&mut self, _archive: u32) {
        self.base().step();
    }

    /// Number of files [`end`](Extractor::end) is going to write.
    fn pending_writes(&self) -> u64 {
        self.base().pending_writes()
    }

    fn set_flush_progress(&mut self, flush: Arc<ProgressBar>) {
        self.base_mut().set_flush(flush);
    }

    /// Entries that failed outside their own `extract` call, such as
    /// deferred writes. Resets the count.
    fn take_failures(&mut self) -> usize {
        self.base_mut().take_failures()
    }

    fn end(&mut self) -> Result<()> {
        self.base_mut().end()
    }

    fn clear_extraction_data(&mut self) -> Result<()> {
        self.base_mut().clear();
        Ok(())
    }
}
