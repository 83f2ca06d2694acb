//! Dual-data persistence for extractors.
//!
//! Each category keeps two maps keyed by entry id: a lightweight `web`
//! summary meant for API consumers and a complete `cache` snapshot. Both are
//! loaded when the extractor is built so a pass over a subset of entries keeps
//! everything extracted earlier.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::progress::ProgressBar;
use crate::utils::Result;

pub const WEB_FILE: &str = "data_web.json";
pub const CACHE_FILE: &str = "data_cache.json";

#[derive(Debug)]
pub struct DualData {
    category: String,
    dir: PathBuf,
    web: BTreeMap<u32, Value>,
    cache: BTreeMap<u32, Value>,
}

impl DualData {
    /// Load `extracted/{category}` under `extracted_root`. Missing or corrupt
    /// files start empty.
    pub fn load(extracted_root: &Path, category: &str) -> Self {
        let dir = extracted_root.join(category);
        let web = read_map(&dir.join(WEB_FILE));
        let cache = read_map(&dir.join(CACHE_FILE));
        debug!(
            "Loaded dual data for {}: {} web, {} cache entries",
            category,
            web.len(),
            cache.len()
        );

        Self {
            category: category.to_string(),
            dir,
            web,
            cache,
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn insert(&mut self, id: u32, web: Value, cache: Value) {
        self.web.insert(id, web);
        self.cache.insert(id, cache);
    }

    pub fn remove(&mut self, id: u32) {
        self.web.remove(&id);
        self.cache.remove(&id);
    }

    pub fn web(&self) -> &BTreeMap<u32, Value> {
        &self.web
    }

    pub fn cache(&self) -> &BTreeMap<u32, Value> {
        &self.cache
    }

    /// Number of files `flush` writes.
    pub fn pending_writes(&self) -> u64 {
        u64::from(!self.web.is_empty()) + u64::from(!self.cache.is_empty())
    }

    /// Write both maps back. An empty map is not written, and any file left
    /// over from an earlier pass for it is removed.
    pub fn flush(&self, flush_bar: Option<&ProgressBar>) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        for (name, map) in [(WEB_FILE, &self.web), (CACHE_FILE, &self.cache)] {
            let path = self.dir.join(name);
            if map.is_empty() {
                if path.exists() {
                    fs::remove_file(&path)?;
                }
                continue;
            }

            fs::write(&path, serde_json::to_vec(map)?)?;
            if let Some(bar) = flush_bar {
                bar.inc(1);
            }
        }

        debug!(
            "Flushed {} ({} web, {} cache entries)",
            self.category,
            self.web.len(),
            self.cache.len()
        );
        Ok(())
    }

    pub fn clear(&mut self) {
        self.web = BTreeMap::new();
        self.cache = BTreeMap::new();
    }
}

fn read_map(path: &Path) -> BTreeMap<u32, Value> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => return BTreeMap::new(),
    };
    match serde_json::from_slice(&bytes) {
        Ok(map) => map,
        Err(e) => {
            warn!("Ignoring unreadable {}: {}", path.display(), e);
            BTreeMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_flush_then_reload_merges() -> Result<()> {
        let temp_dir = TempDir::new()?;

        let mut first = DualData::load(temp_dir.path(), "items");
        first.insert(4151, json!({"id": 4151}), json!({"id": 4151, "size": 12}));
        first.flush(None)?;

        let mut second = DualData::load(temp_dir.path(), "items");
        assert_eq!(second.web().len(), 1);
        second.insert(11802, json!({"id": 11802}), json!({"id": 11802, "size": 9}));
        second.flush(None)?;

        let third = DualData::load(temp_dir.path(), "items");
        assert_eq!(third.cache().keys().copied().collect::<Vec<_>>(), vec![4151, 11802]);
        Ok(())
    }

    #[test]
    fn test_keys_are_decimal_strings() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut data = DualData::load(temp_dir.path(), "npcs");
        data.insert(7, json!("guard"), json!({"name": "guard"}));
        data.flush(None)?;

        let raw = fs::read_to_string(temp_dir.path().join("npcs").join(WEB_FILE))?;
        assert_eq!(raw, r#"{"7":"guard"}"#);
        Ok(())
    }

    #[test]
    fn test_empty_maps_are_not_written() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut data = DualData::load(temp_dir.path(), "sprites");
        assert_eq!(data.pending_writes(), 0);
        data.flush(None)?;
        assert!(!temp_dir.path().join("sprites").join(WEB_FILE).exists());

        data.insert(1, json!(1), json!(1));
        data.flush(None)?;
        assert!(temp_dir.path().join("sprites").join(CACHE_FILE).exists());

        let mut reloaded = DualData::load(temp_dir.path(), "sprites");
        reloaded.remove(1);
        reloaded.flush(None)?;
        assert!(!temp_dir.path().join("sprites").join(CACHE_FILE).exists());
        Ok(())
    }

    #[test]
    fn test_corrupt_file_starts_empty() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join("textures"))?;
        fs::write(temp_dir.path().join("textures").join(WEB_FILE), b"[not json")?;

        let data = DualData::load(temp_dir.path(), "textures");
        assert!(data.web().is_empty());
        Ok(())
    }

    #[test]
    fn test_clear_drops_entries() {
        let temp_dir = TempDir::new().unwrap();
        let mut data = DualData::load(temp_dir.path(), "items");
        data.insert(1, json!(1), json!(1));
        data.clear();
        assert!(data.web().is_empty());
        assert!(data.cache().is_empty());
    }
}
