//! Gameval name tables.
//!
//! The gameval index holds one archive per table (items, npcs, sprites...) and
//! one file per id whose content is the symbolic name. Other extractors attach
//! these names to their output through a [`NameTable`] owned by the pass.

use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use super::{Extractor, ExtractorBase};
use crate::checksum::checksum;
use crate::game::index;
use crate::store::Cache;
use crate::utils::{Result, SyncError};

/// Decode a gameval entry into its name.
pub fn decode_name(data: &[u8]) -> Option<String> {
    let name = String::from_utf8_lossy(data);
    let name = name.trim_end_matches('\0').trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Name lookups for one pass, loaded table by table from the cache on first use.
///
/// Clones share the same tables.
#[derive(Clone)]
pub struct NameTable {
    cache: Option<Arc<dyn Cache>>,
    tables: Arc<RwLock<HashMap<u32, BTreeMap<u32, String>>>>,
}

impl NameTable {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache: Some(cache),
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// A table that never loads anything from a cache.
    pub fn detached() -> Self {
        Self {
            cache: None,
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn load_table(&self, table: u32) -> BTreeMap<u32, String> {
        let cache = match &self.cache {
            Some(cache) => cache,
            None => return BTreeMap::new(),
        };
        cache
            .files(index::GAMEVALS, table)
            .into_iter()
            .filter_map(|id| {
                let data = cache.data(index::GAMEVALS, table, Some(id))?;
                Some((id, decode_name(&data)?))
            })
            .collect()
    }

    fn ensure_loaded(&self, table: u32) {
        {
            let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
            if tables.contains_key(&table) {
                return;
            }
        }
        let loaded = self.load_table(table);
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.entry(table).or_insert(loaded);
    }

    pub fn get(&self, table: u32, id: u32) -> Option<String> {
        self.ensure_loaded(table);
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables.get(&table)?.get(&id).cloned()
    }

    pub fn insert(&self, table: u32, id: u32, name: String) {
        self.ensure_loaded(table);
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.entry(table).or_default().insert(id, name);
    }

    pub fn remove(&self, table: u32, id: u32) {
        self.ensure_loaded(table);
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        if let Some(names) = tables.get_mut(&table) {
            names.remove(&id);
        }
    }

    /// Number of tables loaded so far.
    pub fn loaded_tables(&self) -> usize {
        self.tables.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Extracts one gameval table and keeps the pass's [`NameTable`] current.
pub struct GameValTableExtractor {
    base: ExtractorBase,
    table: u32,
    names: NameTable,
}

impl GameValTableExtractor {
    pub fn new(label: &str, table: u32, extracted_root: &Path, names: NameTable) -> Self {
        let category = format!("gamevals/{}", label);
        Self {
            base: ExtractorBase::with_dual_data(format!("gamevals:{}", label), extracted_root, &category),
            table,
            names,
        }
    }
}

impl Extractor for GameValTableExtractor {
    fn base(&self) -> &ExtractorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ExtractorBase {
        &mut self.base
    }

    fn extract(&mut self, index: u32, archive: u32, file: u32, data: &[u8]) -> Result<()> {
        let name = decode_name(data)
            .ok_or_else(|| SyncError::extraction(index, archive, file, "empty gameval name"))?;

        self.names.insert(self.table, file, name.clone());
        self.base.record(
            file,
            json!(name),
            json!({
                "id": file,
                "table": self.table,
                "name": name,
                "crc32": checksum(data),
            }),
        );
        Ok(())
    }

    fn remove(&mut self, entry: &crate::manifest::FileChecksum) -> Result<()> {
        self.names.remove(self.table, entry.file);
        self.base.forget(entry.file);
        Ok(())
    }
}
