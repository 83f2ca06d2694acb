//! In-memory cache, used by tests and by callers embedding the pipeline.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use super::{Cache, StoreOpener};
use crate::utils::Result;

type Files = BTreeMap<u32, Vec<u8>>;
type Archives = BTreeMap<u32, Files>;

/// A mutable tree of `index -> archive -> file -> bytes`.
///
/// Cloning shares the underlying tree, so a test can keep a handle, hand a
/// clone to the pipeline and change content between passes.
#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<BTreeMap<u32, Archives>>>,
    unreadable: Arc<RwLock<Vec<(u32, u32, u32)>>>,
    closed: Arc<AtomicBool>,
    opens: Arc<AtomicUsize>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, index: u32, archive: u32, file: u32, data: impl Into<Vec<u8>>) {
        let mut tree = self.inner.write().unwrap_or_else(|e| e.into_inner());
        tree.entry(index)
            .or_default()
            .entry(archive)
            .or_default()
            .insert(file, data.into());
    }

    /// Register an empty archive (listed, but holding no files).
    pub fn insert_empty_archive(&self, index: u32, archive: u32) {
        let mut tree = self.inner.write().unwrap_or_else(|e| e.into_inner());
        tree.entry(index).or_default().entry(archive).or_default();
    }

    pub fn remove_file(&self, index: u32, archive: u32, file: u32) {
        let mut tree = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(files) = tree.get_mut(&index).and_then(|a| a.get_mut(&archive)) {
            files.remove(&file);
        }
    }

    pub fn remove_index(&self, index: u32) {
        let mut tree = self.inner.write().unwrap_or_else(|e| e.into_inner());
        tree.remove(&index);
    }

    /// Make reads of one file fail while it stays listed.
    pub fn mark_unreadable(&self, index: u32, archive: u32, file: u32) {
        let mut unreadable = self.unreadable.write().unwrap_or_else(|e| e.into_inner());
        unreadable.push((index, archive, file));
    }

    pub fn clear_unreadable(&self) {
        let mut unreadable = self.unreadable.write().unwrap_or_else(|e| e.into_inner());
        unreadable.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn is_unreadable(&self, index: u32, archive: u32, file: u32) -> bool {
        let unreadable = self.unreadable.read().unwrap_or_else(|e| e.into_inner());
        unreadable.contains(&(index, archive, file))
    }
}

impl Cache for MemoryCache {
    fn indices(&self) -> Vec<u32> {
        let tree = self.inner.read().unwrap_or_else(|e| e.into_inner());
        tree.keys().copied().collect()
    }

    fn archives(&self, index: u32) -> Vec<u32> {
        let tree = self.inner.read().unwrap_or_else(|e| e.into_inner());
        tree.get(&index)
            .map(|archives| archives.keys().copied().collect())
            .unwrap_or_default()
    }

    fn files(&self, index: u32, archive: u32) -> Vec<u32> {
        let tree = self.inner.read().unwrap_or_else(|e| e.into_inner());
        tree.get(&index)
            .and_then(|archives| archives.get(&archive))
            .map(|files| files.keys().copied().collect())
            .unwrap_or_default()
    }

    fn data(&self, index: u32, archive: u32, file: Option<u32>) -> Option<Vec<u8>> {
        let tree = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let files = tree.get(&index)?.get(&archive)?;
        match file {
            Some(file) => {
                if self.is_unreadable(index, archive, file) {
                    return None;
                }
                files.get(&file).cloned()
            }
            None => Some(files.values().flatten().copied().collect()),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out the same [`MemoryCache`] regardless of directory.
impl StoreOpener for MemoryCache {
    fn open(&self, _data_dir: &Path) -> Result<Arc<dyn Cache>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.closed.store(false, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}
