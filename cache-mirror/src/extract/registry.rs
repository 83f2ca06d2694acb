//! Index to extractor mapping and dispatch order.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use super::configs::config_extractor;
use super::names::GameValTableExtractor;
use super::sprites::SpriteExtractor;
use super::textures::TextureExtractor;
use super::{Extractor, NameTable, ParentExtractor};
use crate::game::{gameval_table, index};
use crate::manifest::FileChecksum;
use crate::store::Cache;

/// Indices with an extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    Configs,
    Sprites,
    Textures,
    GameVals,
}

impl IndexType {
    pub const ALL: [IndexType; 4] = [
        IndexType::Configs,
        IndexType::Sprites,
        IndexType::Textures,
        IndexType::GameVals,
    ];

    pub fn from_index(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.index() == id)
    }

    pub fn index(&self) -> u32 {
        match self {
            IndexType::Configs => index::CONFIGS,
            IndexType::Sprites => index::SPRITES,
            IndexType::Textures => index::TEXTURES,
            IndexType::GameVals => index::GAMEVALS,
        }
    }

    fn create(&self, ctx: &ExtractorContext) -> Box<dyn Extractor> {
        match self {
            IndexType::Configs => Box::new(config_extractor(&ctx.extracted_dir, &ctx.names)),
            IndexType::Sprites => Box::new(SpriteExtractor::new(
                &ctx.extracted_dir,
                ctx.names.clone(),
                ctx.write_batch_size,
            )),
            IndexType::Textures => Box::new(TextureExtractor::new(&ctx.extracted_dir, ctx.names.clone())),
            IndexType::GameVals => Box::new(gameval_extractor(ctx)),
        }
    }
}

/// Indices whose output others depend on, earliest first. Everything else
/// runs afterwards in ascending index order.
pub const PROCESSING_ORDER: &[u32] = &[index::GAMEVALS, index::CONFIGS];

const GAMEVAL_TABLES: &[(u32, &str)] = &[
    (gameval_table::ITEMS, "items"),
    (gameval_table::NPCS, "npcs"),
    (gameval_table::OBJECTS, "objects"),
    (gameval_table::SEQUENCES, "sequences"),
    (gameval_table::SPRITES, "sprites"),
    (gameval_table::TEXTURES, "textures"),
];

fn gameval_extractor(ctx: &ExtractorContext) -> ParentExtractor {
    GAMEVAL_TABLES
        .iter()
        .fold(ParentExtractor::new("gamevals"), |parent, (table, label)| {
            parent.with_child(
                *table,
                Box::new(GameValTableExtractor::new(label, *table, &ctx.extracted_dir, ctx.names.clone())),
            )
        })
}

/// Dependencies handed to extractors for one pass.
pub struct ExtractorContext {
    pub cache: Arc<dyn Cache>,
    pub extracted_dir: PathBuf,
    pub names: NameTable,
    pub write_batch_size: usize,
}

impl ExtractorContext {
    pub fn new(cache: Arc<dyn Cache>, extracted_dir: PathBuf, write_batch_size: usize) -> Self {
        Self {
            names: NameTable::new(Arc::clone(&cache)),
            cache,
            extracted_dir,
            write_batch_size,
        }
    }
}

/// Sort key placing ordered indices first.
fn processing_rank(index: u32) -> (usize, u32) {
    let position = PROCESSING_ORDER
        .iter()
        .position(|ordered| *ordered == index)
        .unwrap_or(PROCESSING_ORDER.len());
    (position, index)
}

pub fn compare_indices(a: u32, b: u32) -> Ordering {
    processing_rank(a).cmp(&processing_rank(b))
}

/// Stable sort of a changeset into processing order.
pub fn sort_changeset(entries: &mut [FileChecksum]) {
    entries.sort_by(|a, b| compare_indices(a.index, b.index));
}

/// Build extractors for `indices`, in processing order. Indices without an
/// extractor are skipped.
pub fn build_extractors(indices: &BTreeSet<u32>, ctx: &ExtractorContext) -> Vec<(u32, Box<dyn Extractor>)> {
    let mut ordered: Vec<u32> = indices.iter().copied().collect();
    ordered.sort_by(|a, b| compare_indices(*a, *b));

    ordered
        .into_iter()
        .filter_map(|index| match IndexType::from_index(index) {
            Some(index_type) => Some((index, index_type.create(ctx))),
            None => {
                debug!("No extractor registered for index {}", index);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCache;
    use tempfile::TempDir;

    #[test]
    fn test_index_type_lookup() {
        assert_eq!(IndexType::from_index(index::SPRITES), Some(IndexType::Sprites));
        assert_eq!(IndexType::from_index(index::MODELS), None);
        for index_type in IndexType::ALL {
            assert_eq!(IndexType::from_index(index_type.index()), Some(index_type));
        }
    }

    #[test]
    fn test_changeset_sorted_by_processing_order() {
        let mut entries = vec![
            FileChecksum::of(index::TEXTURES, 0, 1, b"t"),
            FileChecksum::of(index::SPRITES, 4, 0, b"s"),
            FileChecksum::of(index::CONFIGS, 10, 1, b"c1"),
            FileChecksum::of(index::GAMEVALS, 0, 1, b"g"),
            FileChecksum::of(index::CONFIGS, 9, 2, b"c2"),
            FileChecksum::of(index::MODELS, 0, 1, b"m"),
        ];
        sort_changeset(&mut entries);

        let order: Vec<(u32, u32)> = entries.iter().map(|e| (e.index, e.archive)).collect();
        assert_eq!(
            order,
            vec![
                (index::GAMEVALS, 0),
                (index::CONFIGS, 10),
                (index::CONFIGS, 9),
                (index::MODELS, 0),
                (index::SPRITES, 4),
                (index::TEXTURES, 0),
            ]
        );
    }

    #[test]
    fn test_build_extractors_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = ExtractorContext::new(Arc::new(MemoryCache::new()), temp_dir.path().to_path_buf(), 8);
        let indices = BTreeSet::from([index::TEXTURES, index::MODELS, index::CONFIGS, index::GAMEVALS]);

        let extractors = build_extractors(&indices, &ctx);
        let built: Vec<(u32, &str)> = extractors.iter().map(|(i, e)| (*i, e.name())).collect();
        assert_eq!(
            built,
            vec![
                (index::GAMEVALS, "gamevals"),
                (index::CONFIGS, "configs"),
                (index::TEXTURES, "textures"),
            ]
        );
    }
}
