//! Config index extraction (items, npcs, objects, sequences).

use serde_json::json;
use std::path::Path;

use super::{Extractor, ExtractorBase, NameTable, ParentExtractor};
use crate::checksum::checksum;
use crate::game::{config_archive, gameval_table};
use crate::utils::{Result, SyncError};

/// Config sub-categories with a dedicated extractor:
/// `(archive, category, gameval table for names)`.
pub const CONFIG_CATEGORIES: &[(u32, &str, u32)] = &[
    (config_archive::OBJECTS, "objects", gameval_table::OBJECTS),
    (config_archive::NPCS, "npcs", gameval_table::NPCS),
    (config_archive::ITEMS, "items", gameval_table::ITEMS),
    (config_archive::SEQUENCES, "sequences", gameval_table::SEQUENCES),
];

/// Records one config archive, one entry per definition id.
pub struct ConfigRecordExtractor {
    base: ExtractorBase,
    name_table: u32,
    names: NameTable,
}

impl ConfigRecordExtractor {
    pub fn new(category: &str, name_table: u32, extracted_root: &Path, names: NameTable) -> Self {
        Self {
            base: ExtractorBase::with_dual_data(format!("configs:{}", category), extracted_root, category),
            name_table,
            names,
        }
    }
}

impl Extractor for ConfigRecordExtractor {
    fn base(&self) -> &ExtractorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ExtractorBase {
        &mut self.base
    }

    fn extract(&mut self, index: u32, archive: u32, file: u32, data: &[u8]) -> Result<()> {
        // Every definition ends with its opcode-0 terminator
        if data.last() != Some(&0) {
            return Err(SyncError::extraction(index, archive, file, "definition is not terminated"));
        }

        let name = self.names.get(self.name_table, file);
        self.base.record(
            file,
            json!({
                "id": file,
                "name": name,
            }),
            json!({
                "id": file,
                "name": name,
                "archive": archive,
                "size": data.len(),
                "crc32": checksum(data),
            }),
        );
        Ok(())
    }
}

/// The config index parent, one child per known sub-category.
pub fn config_extractor(extracted_root: &Path, names: &NameTable) -> ParentExtractor {
    CONFIG_CATEGORIES
        .iter()
        .fold(ParentExtractor::new("configs"), |parent, (archive, category, table)| {
            parent.with_child(
                *archive,
                Box::new(ConfigRecordExtractor::new(category, *table, extracted_root, names.clone())),
            )
        })
}
