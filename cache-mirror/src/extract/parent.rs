//! Extractors that fan out to children by sub-category.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use super::{Extractor, ExtractorBase};
use crate::manifest::FileChecksum;
use crate::progress::{Progress, ProgressBar};
use crate::utils::Result;

/// Routes entries to a child keyed by archive id.
///
/// Entries no child claims are counted against the parent's own bar and
/// otherwise ignored. Every child owns its own dual data.
pub struct ParentExtractor {
    base: ExtractorBase,
    children: BTreeMap<u32, Box<dyn Extractor>>,
}

impl ParentExtractor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: ExtractorBase::new(name),
            children: BTreeMap::new(),
        }
    }

    pub fn with_child(mut self, archive: u32, child: Box<dyn Extractor>) -> Self {
        self.children.insert(archive, child);
        self
    }

    pub fn child(&self, archive: u32) -> Option<&dyn Extractor> {
        self.children.get(&archive).map(|child| child.as_ref())
    }

    pub fn claims(&self, archive: u32) -> bool {
        self.children.contains_key(&archive)
    }
}

impl Extractor for ParentExtractor {
    fn base(&self) -> &ExtractorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ExtractorBase {
        &mut self.base
    }

    fn extract(&mut self, index: u32, archive: u32, file: u32, data: &[u8]) -> Result<()> {
        match self.children.get_mut(&archive) {
            Some(child) => child.extract(index, archive, file, data),
            None => Ok(()),
        }
    }

    fn remove(&mut self, entry: &FileChecksum) -> Result<()> {
        match self.children.get_mut(&entry.archive) {
            Some(child) => child.remove(entry),
            None => Ok(()),
        }
    }

    fn prepare(&mut self, entries: &[FileChecksum], progress: &Progress) {
        let mut by_archive: BTreeMap<u32, Vec<FileChecksum>> = BTreeMap::new();
        let mut unclaimed = 0u64;
        for entry in entries {
            if self.children.contains_key(&entry.archive) {
                by_archive.entry(entry.archive).or_default().push(*entry);
            } else {
                unclaimed += 1;
            }
        }

        for (archive, child) in self.children.iter_mut() {
            if let Some(entries) = by_archive.get(archive) {
                child.prepare(entries, progress);
            }
        }

        if unclaimed > 0 {
            let bar = progress.bar(self.base.name().to_string(), unclaimed);
            self.base.attach_bar(bar);
        }
    }

    fn advance(&mut self, archive: u32) {
        match self.children.get_mut(&archive) {
            Some(child) => child.advance(archive),
            None => self.base.step(),
        }
    }

    fn pending_writes(&self) -> u64 {
        self.base.pending_writes() + self.children.values().map(|c| c.pending_writes()).sum::<u64>()
    }

    fn set_flush_progress(&mut self, flush: Arc<ProgressBar>) {
        for child in self.children.values_mut() {
            child.set_flush_progress(Arc::clone(&flush));
        }
        self.base.set_flush(flush);
    }

    fn take_failures(&mut self) -> usize {
        let children: usize = self.children.values_mut().map(|child| child.take_failures()).sum();
        children + self.base.take_failures()
    }

    /// Ends every child even if one fails; the first failure is returned.
    fn end(&mut self) -> Result<()> {
        let mut first_error = None;
        for child in self.children.values_mut() {
            if let Err(e) = child.end() {
                warn!("Failed to finish {}: {}", child.name(), e);
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.base.end() {
            first_error.get_or_insert(e);
        }
        first_error.map_or(Ok(()), Err)
    }

    fn clear_extraction_data(&mut self) -> Result<()> {
        let mut first_error = None;
        for child in self.children.values_mut() {
            if let Err(e) = child.clear_extraction_data() {
                first_error.get_or_insert(e);
            }
        }
        self.base.clear();
        first_error.map_or(Ok(()), Err)
    }
}
