//! Game and deployment identifiers shared by manifests, paths and the upstream.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::utils::SyncError;

/// Cache index ids for the old school game.
pub mod index {
    pub const CONFIGS: u32 = 2;
    pub const MAPS: u32 = 5;
    pub const MODELS: u32 = 7;
    pub const SPRITES: u32 = 8;
    pub const TEXTURES: u32 = 9;
    pub const GAMEVALS: u32 = 24;
}

/// Archive ids within the config index.
pub mod config_archive {
    pub const UNDERLAYS: u32 = 1;
    pub const OVERLAYS: u32 = 4;
    pub const OBJECTS: u32 = 6;
    pub const NPCS: u32 = 9;
    pub const ITEMS: u32 = 10;
    pub const SEQUENCES: u32 = 12;
}

/// Archive ids within the gameval index. Each archive is one name table.
pub mod gameval_table {
    pub const ITEMS: u32 = 0;
    pub const NPCS: u32 = 1;
    pub const OBJECTS: u32 = 6;
    pub const SEQUENCES: u32 = 7;
    pub const SPRITES: u32 = 12;
    pub const TEXTURES: u32 = 14;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    OldSchool,
    RuneScape,
}

impl GameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameType::OldSchool => "oldschool",
            GameType::RuneScape => "runescape",
        }
    }

    /// Indices worth checksumming for this game.
    pub fn default_indices(&self) -> Vec<u32> {
        match self {
            GameType::OldSchool => vec![
                index::CONFIGS,
                index::MAPS,
                index::MODELS,
                index::SPRITES,
                index::TEXTURES,
                index::GAMEVALS,
            ],
            GameType::RuneScape => vec![index::CONFIGS, index::SPRITES, index::TEXTURES],
        }
    }

    /// Indices handled by their own pipeline and never part of the manifest.
    pub fn default_excluded_indices(&self) -> Vec<u32> {
        match self {
            // Map geometry is rendered separately and is far too large to diff per file.
            GameType::OldSchool => vec![index::MAPS],
            GameType::RuneScape => Vec::new(),
        }
    }

    /// Per-index archive allow-lists. Indices without an entry keep every archive.
    pub fn default_archive_filters(&self) -> BTreeMap<u32, Vec<u32>> {
        let mut filters = BTreeMap::new();
        if let GameType::OldSchool = self {
            filters.insert(
                index::CONFIGS,
                vec![
                    config_archive::UNDERLAYS,
                    config_archive::OVERLAYS,
                    config_archive::OBJECTS,
                    config_archive::NPCS,
                    config_archive::ITEMS,
                    config_archive::SEQUENCES,
                ],
            );
        }
        filters
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "oldschool" | "osrs" => Ok(GameType::OldSchool),
            "runescape" | "rs3" => Ok(GameType::RuneScape),
            other => Err(SyncError::Config(format!("Unknown game type: {}", other))),
        }
    }
}

/// Deployment target of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Live,
    Beta,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Live => "live",
            Environment::Beta => "beta",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "live" => Ok(Environment::Live),
            "beta" => Ok(Environment::Beta),
            other => Err(SyncError::Config(format!("Unknown environment: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_type_parsing() {
        assert_eq!("oldschool".parse::<GameType>().unwrap(), GameType::OldSchool);
        assert_eq!("OSRS".parse::<GameType>().unwrap(), GameType::OldSchool);
        assert!("darkscape".parse::<GameType>().is_err());
    }

    #[test]
    fn test_environment_serde_is_lowercase() {
        let json = serde_json::to_string(&Environment::Beta).unwrap();
        assert_eq!(json, "\"beta\"");
        assert_eq!(serde_json::from_str::<Environment>("\"live\"").unwrap(), Environment::Live);
    }

    #[test]
    fn test_oldschool_excludes_maps() {
        let game = GameType::OldSchool;
        assert!(game.default_indices().contains(&index::MAPS));
        assert_eq!(game.default_excluded_indices(), vec![index::MAPS]);
        assert!(game.default_archive_filters().contains_key(&index::CONFIGS));
    }
}
