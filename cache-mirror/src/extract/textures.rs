//! Texture extraction.

use serde_json::json;
use std::path::Path;

use super::{Extractor, ExtractorBase, NameTable};
use crate::checksum::checksum;
use crate::game::gameval_table;
use crate::utils::{Result, SyncError};

pub const CATEGORY: &str = "textures";

/// Texture definitions, named through the gameval texture table.
pub struct TextureExtractor {
    base: ExtractorBase,
    names: NameTable,
}

impl TextureExtractor {
    pub fn new(extracted_root: &Path, names: NameTable) -> Self {
        Self {
            base: ExtractorBase::with_dual_data(CATEGORY, extracted_root, CATEGORY),
            names,
        }
    }
}

impl Extractor for TextureExtractor {
    fn base(&self) -> &ExtractorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ExtractorBase {
        &mut self.base
    }

    fn extract(&mut self, index: u32, archive: u32, file: u32, data: &[u8]) -> Result<()> {
        // Header: average colour (u16) followed by the opaque flag
        if data.len() < 3 {
            return Err(SyncError::extraction(index, archive, file, "texture header truncated"));
        }
        let average_colour = u16::from_be_bytes([data[0], data[1]]);
        let opaque = data[2] != 0;
        let name = self.names.get(gameval_table::TEXTURES, file);

        self.base.record(
            file,
            json!({
                "id": file,
                "name": name,
            }),
            json!({
                "id": file,
                "name": name,
                "averageColour": average_colour,
                "opaque": opaque,
                "size": data.len(),
                "crc32": checksum(data),
            }),
        );
        Ok(())
    }
}
