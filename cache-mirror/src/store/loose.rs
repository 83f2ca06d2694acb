//! Cache backed by a loose `{index}/{archive}/{file}` directory layout.
//!
//! Every level is a directory or file named by its decimal id; anything else
//! in the tree is ignored.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::{Cache, StoreOpener};
use crate::utils::{Result, SyncError};

pub struct LooseFileStore {
    root: PathBuf,
    closed: AtomicBool,
}

impl LooseFileStore {
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(SyncError::StoreOpen {
                path: root.to_path_buf(),
                message: "data directory does not exist".to_string(),
            });
        }

        Ok(Self {
            root: root.to_path_buf(),
            closed: AtomicBool::new(false),
        })
    }

    fn numeric_children(&self, dir: &Path, want_dirs: bool) -> Vec<u32> {
        if self.closed.load(Ordering::Relaxed) {
            return Vec::new();
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut ids: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_type()
                    .map(|t| if want_dirs { t.is_dir() } else { t.is_file() })
                    .unwrap_or(false)
            })
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .collect();
        ids.sort_unstable();
        ids
    }

    fn archive_dir(&self, index: u32, archive: u32) -> PathBuf {
        self.root.join(index.to_string()).join(archive.to_string())
    }
}

impl Cache for LooseFileStore {
    fn indices(&self) -> Vec<u32> {
        self.numeric_children(&self.root, true)
    }

    fn archives(&self, index: u32) -> Vec<u32> {
        self.numeric_children(&self.root.join(index.to_string()), true)
    }

    fn files(&self, index: u32, archive: u32) -> Vec<u32> {
        self.numeric_children(&self.archive_dir(index, archive), false)
    }

    fn data(&self, index: u32, archive: u32, file: Option<u32>) -> Option<Vec<u8>> {
        if self.closed.load(Ordering::Relaxed) {
            return None;
        }

        let dir = self.archive_dir(index, archive);
        match file {
            Some(file) => fs::read(dir.join(file.to_string())).ok(),
            None => {
                if !dir.is_dir() {
                    return None;
                }
                let mut data = Vec::new();
                for file in self.files(index, archive) {
                    data.extend(fs::read(dir.join(file.to_string())).ok()?);
                }
                Some(data)
            }
        }
    }

    fn close(&self) {
        debug!("Closing loose file store at {}", self.root.display());
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// Opens a [`LooseFileStore`] over the data directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct LooseFileOpener;

impl StoreOpener for LooseFileOpener {
    fn open(&self, data_dir: &Path) -> Result<Arc<dyn Cache>> {
        Ok(Arc::new(LooseFileStore::open(data_dir)?))
    }
}
