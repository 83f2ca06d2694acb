//! Read-only access to a raw cache.
//!
//! The container format itself lives behind [`Cache`]; the pipeline only ever
//! asks which indices, archives and files exist and for their bytes.

pub mod loose;
pub mod memory;

use std::path::Path;
use std::sync::Arc;

use crate::utils::Result;

pub use loose::{LooseFileOpener, LooseFileStore};
pub use memory::MemoryCache;

/// Read interface over an opened cache.
///
/// Missing entries are reported as `None` or empty lists, never as errors.
pub trait Cache: Send + Sync {
    fn indices(&self) -> Vec<u32>;

    fn archives(&self, index: u32) -> Vec<u32>;

    fn file_count(&self, index: u32, archive: u32) -> usize {
        self.files(index, archive).len()
    }

    fn files(&self, index: u32, archive: u32) -> Vec<u32>;

    /// Bytes of one file, or of the whole archive when `file` is `None`.
    fn data(&self, index: u32, archive: u32, file: Option<u32>) -> Option<Vec<u8>>;

    /// Release underlying handles. Further reads may return `None`.
    fn close(&self) {}
}

/// Opens a [`Cache`] over a local data directory.
pub trait StoreOpener: Send + Sync {
    fn open(&self, data_dir: &Path) -> Result<Arc<dyn Cache>>;
}
